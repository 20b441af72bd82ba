//! Execution log models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    /// Stable string form, as persisted in the store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Delivery outcome for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelDelivery {
    /// Successful delivery.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            delivered: true,
            error: None,
        }
    }

    /// Failed delivery with a reason.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            delivered: false,
            error: Some(error.into()),
        }
    }
}

/// Per-channel delivery results, keyed by channel name.
///
/// BTreeMap keeps the serialized order stable.
pub type ChannelResults = BTreeMap<String, ChannelDelivery>;

/// One attempt to run a scheduled prompt. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Unique log entry ID.
    pub id: i64,
    /// Schedule this attempt belongs to.
    pub scheduled_prompt_id: i64,
    /// Instant the attempt started.
    pub execution_time: DateTime<Utc>,
    /// Overall attempt outcome.
    pub status: ExecutionStatus,
    /// Generated result text, when generation succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    /// Per-channel delivery outcomes, when any channel was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_results: Option<ChannelResults>,
    /// Error message, when generation failed or timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Attempt duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields required to append a log entry.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub scheduled_prompt_id: i64,
    pub execution_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub result_text: Option<String>,
    pub channel_results: Option<ChannelResults>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_round_trip() {
        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("partial"), None);
    }

    #[test]
    fn test_channel_delivery_json_omits_absent_error() {
        let json = serde_json::to_string(&ChannelDelivery::ok()).unwrap();
        assert_eq!(json, r#"{"delivered":true}"#);

        let json = serde_json::to_string(&ChannelDelivery::failed("boom")).unwrap();
        assert_eq!(json, r#"{"delivered":false,"error":"boom"}"#);
    }
}
