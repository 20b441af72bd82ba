//! Schedule management and scheduler control endpoints.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::domain::{
    ChannelFlags, LicenseAccount, NewSchedule, ScheduleStatus, ScheduledPrompt, StatusCounts,
    schedules::format_display_time,
};
use crate::gateway::error::ApiError;
use crate::scheduler::{QuotaStatus, retention_cutoff};

/// Schedule routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/schedules", post(create_schedule))
        .route("/api/v1/schedules", get(list_schedules))
        .route("/api/v1/schedules/stats", get(schedule_stats))
        .route("/api/v1/schedules/{id}", get(get_schedule))
        .route("/api/v1/schedules/{id}", delete(delete_schedule))
        .route("/api/v1/schedules/{id}/logs", get(get_schedule_logs))
        .route("/api/v1/scheduler/run", post(run_scheduler))
        .route("/api/v1/scheduler/status", get(scheduler_status))
}

/// Longest accepted schedule title, in characters.
const MAX_TITLE_CHARS: usize = 200;
/// Longest accepted prompt body, in characters.
const MAX_CONTENT_CHARS: usize = 8000;

/// Request to create a new schedule.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    /// Short human title.
    pub title: String,
    /// Prompt body given to the engine.
    pub content: String,
    /// Execution instant, RFC 3339 with offset.
    pub scheduled_at: String,
    /// IANA timezone name the user scheduled in.
    pub timezone: String,
    /// Optional saved-prompt template reference.
    #[serde(default)]
    pub prompt_id: Option<i64>,
    /// Delivery channel flags.
    #[serde(default)]
    pub channels: ChannelFlags,
}

/// Schedule response.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    /// Schedule ID.
    pub id: i64,
    /// Optional saved-prompt template reference.
    pub prompt_id: Option<i64>,
    /// Short human title.
    pub title: String,
    /// Prompt body.
    pub content: String,
    /// Execution instant in UTC.
    pub scheduled_at: String,
    /// IANA timezone name.
    pub timezone: String,
    /// Wall-clock rendering of `scheduled_at` in `timezone`.
    pub display_time: String,
    /// Lifecycle state.
    pub status: ScheduleStatus,
    /// Delivery channel flags.
    pub channels: ChannelFlags,
    /// Number of execution attempts so far.
    pub attempt_count: u32,
    /// Most recent execution attempt.
    pub last_execution_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

impl From<ScheduledPrompt> for ScheduleResponse {
    fn from(schedule: ScheduledPrompt) -> Self {
        Self {
            id: schedule.id,
            prompt_id: schedule.prompt_id,
            title: schedule.title,
            content: schedule.content,
            scheduled_at: schedule.scheduled_at.to_rfc3339(),
            timezone: schedule.timezone,
            display_time: schedule.display_time,
            status: schedule.status,
            channels: schedule.channels,
            attempt_count: schedule.attempt_count,
            last_execution_at: schedule.last_execution_at.map(|dt| dt.to_rfc3339()),
            created_at: schedule.created_at.to_rfc3339(),
            updated_at: schedule.updated_at.to_rfc3339(),
        }
    }
}

/// Schedule statistics response.
#[derive(Debug, Serialize)]
pub struct ScheduleStatsResponse {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub quota: QuotaStatus,
}

/// Scheduler status response.
#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    pub running: bool,
    pub poll_interval_secs: u64,
}

/// Create a new schedule.
///
/// # Endpoint
///
/// `POST /api/v1/schedules`
pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::bad_request(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    if req.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::bad_request(format!(
            "content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }

    let scheduled_at = DateTime::parse_from_rfc3339(&req.scheduled_at)
        .map_err(|e| {
            ApiError::bad_request(format!("scheduled_at is not a valid RFC 3339 timestamp: {e}"))
        })?
        .with_timezone(&Utc);
    if scheduled_at <= Utc::now() {
        return Err(ApiError::bad_request("scheduled_at must be in the future"));
    }
    let zone: Tz = req.timezone.parse().map_err(|_| {
        ApiError::bad_request(format!("timezone {:?} is not a known IANA zone", req.timezone))
    })?;

    let live = state
        .db
        .count_live_schedules(account.id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to check schedule quota", &e))?;
    let quota = QuotaStatus::new(live, state.config.scheduler.max_live_schedules);
    if quota.exhausted() {
        return Err(ApiError::quota_exceeded(format!(
            "Schedule limit reached ({} of {} in use). Delete a schedule to make room.",
            quota.used, quota.max
        )));
    }

    let new = NewSchedule {
        owner_id: account.id,
        prompt_id: req.prompt_id,
        title: title.to_string(),
        content: req.content,
        scheduled_at,
        timezone: req.timezone,
        display_time: format_display_time(scheduled_at, zone),
        channels: req.channels,
    };
    let schedule = state
        .db
        .insert_schedule(&new)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to create schedule", &e))?;

    tracing::info!(
        schedule_id = schedule.id,
        owner_id = account.id,
        "Schedule created"
    );
    Ok((StatusCode::CREATED, Json(ScheduleResponse::from(schedule))))
}

/// List the caller's schedules, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/schedules`
pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let schedules = state
        .db
        .list_schedules(account.id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to list schedules", &e))?;

    let responses: Vec<ScheduleResponse> = schedules.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}

/// Per-status schedule counts and quota usage for the caller.
///
/// # Endpoint
///
/// `GET /api/v1/schedules/stats`
pub async fn schedule_stats(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
) -> Result<impl IntoResponse, ApiError> {
    let counts = state
        .db
        .schedule_status_counts(account.id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to load schedule stats", &e))?;

    let quota = QuotaStatus::new(
        counts.pending + counts.completed,
        state.config.scheduler.max_live_schedules,
    );
    Ok(Json(ScheduleStatsResponse { counts, quota }))
}

/// Get a schedule by ID.
///
/// # Endpoint
///
/// `GET /api/v1/schedules/{id}`
pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule = state
        .db
        .get_schedule(account.id, id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to load schedule", &e))?
        .ok_or_else(|| ApiError::not_found("Schedule not found"))?;

    Ok(Json(ScheduleResponse::from(schedule)))
}

/// Delete a schedule and its execution logs.
///
/// # Endpoint
///
/// `DELETE /api/v1/schedules/{id}`
pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .delete_schedule(account.id, id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to delete schedule", &e))?;

    if deleted {
        tracing::info!(schedule_id = id, owner_id = account.id, "Schedule deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Schedule not found"))
    }
}

/// List execution log entries for a schedule, newest first, bounded by
/// the retention window.
///
/// # Endpoint
///
/// `GET /api/v1/schedules/{id}/logs`
pub async fn get_schedule_logs(
    State(state): State<AppState>,
    Extension(account): Extension<LicenseAccount>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .get_schedule(account.id, id)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to load schedule", &e))?
        .ok_or_else(|| ApiError::not_found("Schedule not found"))?;

    let cutoff = retention_cutoff(Utc::now(), state.config.scheduler.log_retention_days);
    let logs = state
        .db
        .list_execution_logs(account.id, id, cutoff)
        .await
        .map_err(|e| ApiError::internal(&state.config, "Failed to list execution logs", &e))?;

    Ok(Json(logs))
}

/// Run one execution cycle immediately.
///
/// Shares the executor's cycle lock with the poller, so a manual run
/// never overlaps a polled one.
///
/// # Endpoint
///
/// `POST /api/v1/scheduler/run`
pub async fn run_scheduler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.executor.run_cycle().await;
    Json(outcome)
}

/// Report whether the background poller is running.
///
/// # Endpoint
///
/// `GET /api/v1/scheduler/status`
pub async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(SchedulerStatusResponse {
        running: state.poller.is_running(),
        poll_interval_secs: state.poller.poll_interval().as_secs(),
    })
}
