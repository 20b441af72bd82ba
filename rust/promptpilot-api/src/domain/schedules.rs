//! Scheduled prompt models.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::integrations::Channel;

/// Lifecycle state of a scheduled prompt.
///
/// `failed` is terminal: a failed schedule is excluded from the due query
/// and is never re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    /// Stable string form, as persisted in the store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Live schedules count against the per-owner quota.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }
}

/// Per-schedule delivery channel flags. Both default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    #[serde(default)]
    pub telegram: bool,
    #[serde(default)]
    pub discord: bool,
}

impl ChannelFlags {
    /// Channels enabled on this schedule, in stable order.
    #[must_use]
    pub fn enabled(self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.telegram {
            channels.push(Channel::Telegram);
        }
        if self.discord {
            channels.push(Channel::Discord);
        }
        channels
    }
}

/// One future automation request.
///
/// Immutable after creation except for `status`, `attempt_count`,
/// `last_execution_at`, and `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPrompt {
    /// Unique schedule ID.
    pub id: i64,
    /// Account that owns this schedule.
    pub owner_id: i64,
    /// Optional saved-prompt template reference.
    pub prompt_id: Option<i64>,
    /// Short human title.
    pub title: String,
    /// Free-text prompt body given to the engine.
    pub content: String,
    /// Execution instant, normalized to UTC.
    pub scheduled_at: DateTime<Utc>,
    /// IANA timezone name the user scheduled in.
    pub timezone: String,
    /// Wall-clock rendering of `scheduled_at` in `timezone`.
    ///
    /// Derived once at creation and never recomputed, so later
    /// timezone-rule changes do not alter historical display.
    pub display_time: String,
    /// Lifecycle state.
    pub status: ScheduleStatus,
    /// Delivery channel flags.
    pub channels: ChannelFlags,
    /// Number of execution attempts so far.
    pub attempt_count: u32,
    /// Instant of the most recent execution attempt.
    pub last_execution_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub owner_id: i64,
    pub prompt_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub display_time: String,
    pub channels: ChannelFlags,
}

/// Aggregate schedule counts for one owner.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusCounts {
    pub total: u32,
    pub pending: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
}

/// Renders an instant as wall-clock time in the given zone.
///
/// Used exactly once per schedule, at creation.
#[must_use]
pub fn format_display_time(scheduled_at: DateTime<Utc>, zone: Tz) -> String {
    scheduled_at
        .with_timezone(&zone)
        .format("%Y-%m-%d %H:%M %Z")
        .to_string()
}
