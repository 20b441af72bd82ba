//! Execution pipeline for due schedules.
//!
//! Each due schedule goes through five steps: generate, look up channel
//! settings, dispatch, write exactly one log entry, transition status.
//! Generation decides the attempt's outcome; delivery failures are
//! recorded per channel but never fail the attempt. If either durable
//! write fails the schedule stays `pending` and the whole attempt repeats
//! next cycle, so execution is at-least-once under storage failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::database::Database;
use crate::domain::{
    ChannelDelivery, ChannelResults, ExecutionStatus, NewExecutionLog, ScheduleStatus,
    ScheduledPrompt,
};
use crate::engine::PromptEngine;
use crate::notify::{Notifier, ResultPayload};

/// Counters for one execution cycle.
///
/// `executed` counts attempts recorded durably (log written, status
/// transitioned) whatever the generation or delivery outcome; `failed`
/// counts schedules the pipeline could not record, which stay pending and
/// are retried next cycle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleOutcome {
    pub executed: u32,
    pub failed: u32,
}

/// Runs due schedules through the execution pipeline.
pub struct PromptExecutor {
    db: Database,
    engine: Arc<dyn PromptEngine>,
    notifier: Arc<dyn Notifier>,
    engine_timeout: Duration,
    retention_days: u32,
    // Serializes cycles across the poller and the run-now endpoint
    cycle_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for PromptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptExecutor")
            .field("db", &self.db)
            .field("engine_timeout", &self.engine_timeout)
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

impl PromptExecutor {
    pub fn new(
        db: Database,
        engine: Arc<dyn PromptEngine>,
        notifier: Arc<dyn Notifier>,
        engine_timeout: Duration,
        retention_days: u32,
    ) -> Self {
        Self {
            db,
            engine,
            notifier,
            engine_timeout,
            retention_days,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one full cycle: purge expired logs, query due schedules,
    /// execute them oldest first. All errors are caught and logged; a
    /// cycle never propagates a failure to its caller.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let _cycle = self.cycle_lock.lock().await;
        let now = Utc::now();
        let mut outcome = CycleOutcome::default();

        match self
            .db
            .purge_expired_logs(super::retention_cutoff(now, self.retention_days))
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::debug!("Purged {} expired execution log entries", purged),
            Err(err) => tracing::warn!("Execution log purge failed: {:#}", err),
        }

        let due = match self.db.due_schedules(now).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!("Due-schedule query failed: {:#}", err);
                return outcome;
            }
        };

        if due.is_empty() {
            tracing::debug!("No due schedules this cycle");
            return outcome;
        }
        tracing::info!("Executing {} due schedule(s)", due.len());

        for schedule in due {
            match self.execute_one(&schedule).await {
                Ok(status) => {
                    outcome.executed += 1;
                    tracing::info!(
                        schedule_id = schedule.id,
                        status = status.as_str(),
                        "Schedule executed"
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    tracing::error!(
                        schedule_id = schedule.id,
                        "Execution not recorded, schedule stays pending: {:#}",
                        err
                    );
                }
            }
        }
        outcome
    }

    /// Executes one schedule end to end and returns the attempt's outcome.
    /// An error here means a durable write failed and nothing terminal was
    /// recorded for the schedule.
    pub async fn execute_one(&self, schedule: &ScheduledPrompt) -> Result<ExecutionStatus> {
        let started = Utc::now();
        let clock = std::time::Instant::now();

        let generation = tokio::time::timeout(
            self.engine_timeout,
            self.engine.execute(&schedule.title, &schedule.content),
        )
        .await;

        let (status, result_text, error_message) = match generation {
            Ok(Ok(text)) => (ExecutionStatus::Success, Some(text), None),
            Ok(Err(err)) => (ExecutionStatus::Failed, None, Some(format!("{:#}", err))),
            Err(_) => (
                ExecutionStatus::Timeout,
                None,
                Some(format!(
                    "Prompt generation timed out after {}s",
                    self.engine_timeout.as_secs()
                )),
            ),
        };

        // Delivery only happens for a generated result
        let channel_results = match &result_text {
            Some(text) => self.dispatch(schedule, text).await?,
            None => None,
        };

        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.db
            .append_execution_log(&NewExecutionLog {
                scheduled_prompt_id: schedule.id,
                execution_time: started,
                status,
                result_text,
                channel_results,
                error_message,
                duration_ms: Some(duration_ms),
            })
            .await
            .context("Recording execution log")?;

        let schedule_status = match status {
            ExecutionStatus::Success => ScheduleStatus::Completed,
            ExecutionStatus::Failed | ExecutionStatus::Timeout => ScheduleStatus::Failed,
        };
        self.db
            .mark_schedule_executed(schedule.id, schedule_status, started)
            .await
            .context("Recording status transition")?;

        Ok(status)
    }

    /// Sends the generated text to every requested channel, one result per
    /// channel. A missing or deactivated integration is a per-channel
    /// failure, not a pipeline error.
    async fn dispatch(
        &self,
        schedule: &ScheduledPrompt,
        text: &str,
    ) -> Result<Option<ChannelResults>> {
        let channels = schedule.channels.enabled();
        if channels.is_empty() {
            return Ok(None);
        }

        let payload = ResultPayload {
            title: schedule.title.clone(),
            body: text.to_string(),
            display_time: schedule.display_time.clone(),
        };

        let mut results = ChannelResults::new();
        for channel in channels {
            let delivery = match self
                .db
                .get_active_integration(schedule.owner_id, channel)
                .await
                .context("Loading integration settings")?
            {
                Some(integration) => self.notifier.send(&integration.settings, &payload).await,
                None => ChannelDelivery::failed(format!("{} settings not configured", channel)),
            };
            results.insert(channel.as_str().to_string(), delivery);
        }
        Ok(Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelFlags, ChannelSettings, NewSchedule, hash_license_key};
    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;

    struct StubEngine {
        reply: Result<String, String>,
        delay: Option<Duration>,
    }

    impl StubEngine {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                delay: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl PromptEngine for StubEngine {
        async fn execute(&self, _title: &str, _content: &str) -> anyhow::Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(message) => anyhow::bail!("{}", message),
            }
        }

        fn model(&self) -> &str {
            "stub"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        // (channel, payload title) per send, in call order
        deliveries: Mutex<Vec<(String, String)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            settings: &ChannelSettings,
            payload: &ResultPayload,
        ) -> ChannelDelivery {
            self.deliveries
                .lock()
                .push((settings.channel().as_str().to_string(), payload.title.clone()));
            match &self.fail_with {
                Some(err) => ChannelDelivery::failed(err.clone()),
                None => ChannelDelivery::ok(),
            }
        }
    }

    async fn open_test_db() -> (tempfile::TempDir, Database, i64) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("promptpilot.db"));
        db.init().await.expect("init");
        db.seed_license_keys(&["pp-exec".to_string()])
            .await
            .expect("seed");
        let owner = db
            .find_account_by_key_hash(&hash_license_key("pp-exec"))
            .await
            .expect("lookup")
            .expect("account")
            .id;
        (dir, db, owner)
    }

    fn executor_with(
        db: &Database,
        engine: StubEngine,
        notifier: RecordingNotifier,
    ) -> (PromptExecutor, Arc<RecordingNotifier>) {
        let notifier = Arc::new(notifier);
        let executor = PromptExecutor::new(
            db.clone(),
            Arc::new(engine),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Duration::from_secs(5),
            2,
        );
        (executor, notifier)
    }

    fn due_schedule(
        owner_id: i64,
        title: &str,
        minutes_ago: i64,
        channels: ChannelFlags,
    ) -> NewSchedule {
        let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        NewSchedule {
            owner_id,
            prompt_id: None,
            title: title.to_string(),
            content: "Run this prompt".to_string(),
            scheduled_at: at,
            timezone: "UTC".to_string(),
            display_time: at.format("%Y-%m-%d %H:%M UTC").to_string(),
            channels,
        }
    }

    #[tokio::test]
    async fn test_success_without_channels_completes_once() {
        let (_dir, db, owner) = open_test_db().await;
        let (executor, notifier) =
            executor_with(&db, StubEngine::replying("All done"), RecordingNotifier::default());
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Digest", 5, ChannelFlags::default()))
            .await
            .unwrap();

        let outcome = executor.run_cycle().await;
        assert_eq!(outcome.executed, 1);
        assert_eq!(outcome.failed, 0);

        let after = db.get_schedule(owner, schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Completed);
        assert_eq!(after.attempt_count, 1);
        assert!(after.last_execution_at.is_some());

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Success);
        assert_eq!(logs[0].result_text.as_deref(), Some("All done"));
        assert!(logs[0].channel_results.is_none());
        assert!(logs[0].duration_ms.is_some());
        assert!(notifier.deliveries.lock().is_empty());

        // Completed schedules are no longer due; exactly one log remains
        let again = executor.run_cycle().await;
        assert_eq!(again.executed, 0);
        assert_eq!(
            db.list_execution_logs(owner, schedule.id, cutoff)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unconfigured_channel_recorded_without_send() {
        let (_dir, db, owner) = open_test_db().await;
        let (executor, notifier) =
            executor_with(&db, StubEngine::replying("Result"), RecordingNotifier::default());
        let flags = ChannelFlags {
            telegram: true,
            discord: false,
        };
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Reminder", 1, flags))
            .await
            .unwrap();

        let outcome = executor.run_cycle().await;
        assert_eq!(outcome.executed, 1);

        let after = db.get_schedule(owner, schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Completed);

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Success);
        let results = logs[0].channel_results.as_ref().unwrap();
        assert!(!results["telegram"].delivered);
        assert!(
            results["telegram"]
                .error
                .as_deref()
                .unwrap()
                .contains("settings not configured")
        );
        assert!(notifier.deliveries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_configured_channels_delivered_telegram_first() {
        let (_dir, db, owner) = open_test_db().await;
        db.upsert_integration(
            owner,
            &ChannelSettings::Telegram {
                bot_token: "123:abc".to_string(),
                chat_id: "42".to_string(),
            },
        )
        .await
        .unwrap();
        db.upsert_integration(
            owner,
            &ChannelSettings::Discord {
                webhook_url: "https://discord.com/api/webhooks/1/zzz".to_string(),
            },
        )
        .await
        .unwrap();

        let (executor, notifier) =
            executor_with(&db, StubEngine::replying("Both"), RecordingNotifier::default());
        let flags = ChannelFlags {
            telegram: true,
            discord: true,
        };
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Fanout", 1, flags))
            .await
            .unwrap();

        executor.run_cycle().await;

        let sent = notifier.deliveries.lock().clone();
        assert_eq!(
            sent,
            vec![
                ("telegram".to_string(), "Fanout".to_string()),
                ("discord".to_string(), "Fanout".to_string()),
            ]
        );

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        let results = logs[0].channel_results.as_ref().unwrap();
        assert!(results["telegram"].delivered);
        assert!(results["discord"].delivered);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_completes_schedule() {
        let (_dir, db, owner) = open_test_db().await;
        db.upsert_integration(
            owner,
            &ChannelSettings::Discord {
                webhook_url: "https://discord.com/api/webhooks/1/zzz".to_string(),
            },
        )
        .await
        .unwrap();

        let notifier = RecordingNotifier {
            fail_with: Some("429 from platform".to_string()),
            ..RecordingNotifier::default()
        };
        let (executor, _notifier) = executor_with(&db, StubEngine::replying("Generated"), notifier);
        let flags = ChannelFlags {
            telegram: false,
            discord: true,
        };
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Webhook", 1, flags))
            .await
            .unwrap();

        executor.run_cycle().await;

        let after = db.get_schedule(owner, schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Completed);

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Success);
        let results = logs[0].channel_results.as_ref().unwrap();
        assert!(!results["discord"].delivered);
        assert_eq!(results["discord"].error.as_deref(), Some("429 from platform"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal_without_dispatch() {
        let (_dir, db, owner) = open_test_db().await;
        db.upsert_integration(
            owner,
            &ChannelSettings::Telegram {
                bot_token: "123:abc".to_string(),
                chat_id: "42".to_string(),
            },
        )
        .await
        .unwrap();

        let (executor, notifier) = executor_with(
            &db,
            StubEngine::failing("engine exploded"),
            RecordingNotifier::default(),
        );
        let flags = ChannelFlags {
            telegram: true,
            discord: false,
        };
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Doomed", 1, flags))
            .await
            .unwrap();

        let outcome = executor.run_cycle().await;
        assert_eq!(outcome.executed, 1);

        let after = db.get_schedule(owner, schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Failed);
        assert_eq!(after.attempt_count, 1);

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Failed);
        assert!(logs[0].result_text.is_none());
        assert!(logs[0].channel_results.is_none());
        assert!(logs[0].error_message.as_deref().unwrap().contains("engine exploded"));
        assert!(notifier.deliveries.lock().is_empty());

        // Failed is terminal: the schedule never becomes due again
        assert_eq!(executor.run_cycle().await.executed, 0);
    }

    #[tokio::test]
    async fn test_generation_timeout_records_timeout_status() {
        let (_dir, db, owner) = open_test_db().await;
        let engine = StubEngine {
            reply: Ok("too late".to_string()),
            delay: Some(Duration::from_millis(300)),
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = PromptExecutor::new(
            db.clone(),
            Arc::new(engine),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Duration::from_millis(50),
            2,
        );
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Slow", 1, ChannelFlags::default()))
            .await
            .unwrap();

        executor.run_cycle().await;

        let after = db.get_schedule(owner, schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Failed);

        let cutoff = Utc::now() - chrono::Duration::days(2);
        let logs = db.list_execution_logs(owner, schedule.id, cutoff).await.unwrap();
        assert_eq!(logs[0].status, ExecutionStatus::Timeout);
        assert!(logs[0].error_message.as_deref().unwrap().contains("timed out"));
        assert!(logs[0].result_text.is_none());
    }

    #[tokio::test]
    async fn test_same_cycle_runs_oldest_first() {
        let (_dir, db, owner) = open_test_db().await;
        db.upsert_integration(
            owner,
            &ChannelSettings::Telegram {
                bot_token: "123:abc".to_string(),
                chat_id: "42".to_string(),
            },
        )
        .await
        .unwrap();

        let (executor, notifier) =
            executor_with(&db, StubEngine::replying("ok"), RecordingNotifier::default());
        let flags = ChannelFlags {
            telegram: true,
            discord: false,
        };
        // Inserted newest-due-first to prove ordering comes from scheduled_at
        db.insert_schedule(&due_schedule(owner, "third", 1, flags))
            .await
            .unwrap();
        db.insert_schedule(&due_schedule(owner, "first", 30, flags))
            .await
            .unwrap();
        db.insert_schedule(&due_schedule(owner, "second", 10, flags))
            .await
            .unwrap();

        let outcome = executor.run_cycle().await;
        assert_eq!(outcome.executed, 3);

        let titles: Vec<String> = notifier
            .deliveries
            .lock()
            .iter()
            .map(|(_, title)| title.clone())
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_unrecordable_execution_leaves_no_trace() {
        let (_dir, db, owner) = open_test_db().await;
        let (executor, _notifier) =
            executor_with(&db, StubEngine::replying("ghost"), RecordingNotifier::default());

        // A schedule row that does not exist in the store: the log insert
        // trips the foreign key and nothing terminal is recorded
        let phantom = ScheduledPrompt {
            id: 9999,
            owner_id: owner,
            prompt_id: None,
            title: "Phantom".to_string(),
            content: "Run".to_string(),
            scheduled_at: Utc::now(),
            timezone: "UTC".to_string(),
            display_time: "now".to_string(),
            status: ScheduleStatus::Pending,
            channels: ChannelFlags::default(),
            attempt_count: 0,
            last_execution_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let err = executor.execute_one(&phantom).await.unwrap_err();
        assert!(err.to_string().contains("Recording execution log"));
    }

    #[tokio::test]
    async fn test_cycle_swallows_storage_errors() {
        let db = Database::new("/nonexistent/never-opened.db");
        let (executor, _notifier) =
            executor_with(&db, StubEngine::replying("x"), RecordingNotifier::default());

        let outcome = executor.run_cycle().await;
        assert_eq!(outcome.executed, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_cycle_purges_expired_logs() {
        let (dir, db, owner) = open_test_db().await;
        let (executor, _notifier) =
            executor_with(&db, StubEngine::replying("fresh"), RecordingNotifier::default());
        let schedule = db
            .insert_schedule(&due_schedule(owner, "Old logs", 1, ChannelFlags::default()))
            .await
            .unwrap();

        db.append_execution_log(&NewExecutionLog {
            scheduled_prompt_id: schedule.id,
            execution_time: Utc::now(),
            status: ExecutionStatus::Success,
            result_text: Some("ancient".to_string()),
            channel_results: None,
            error_message: None,
            duration_ms: Some(10),
        })
        .await
        .unwrap();

        // Backdate the entry past the retention window
        let conn = rusqlite::Connection::open(dir.path().join("promptpilot.db")).unwrap();
        let old = (Utc::now() - chrono::Duration::days(3)).to_rfc3339();
        conn.execute(
            "UPDATE automation_logs SET created_at = ?1",
            rusqlite::params![old],
        )
        .unwrap();
        drop(conn);

        let wide_open = DateTime::<Utc>::MIN_UTC;
        assert_eq!(
            db.list_execution_logs(owner, schedule.id, wide_open)
                .await
                .unwrap()
                .len(),
            1
        );

        executor.run_cycle().await;

        // The backdated entry is gone; only this cycle's entry remains
        let remaining = db
            .list_execution_logs(owner, schedule.id, wide_open)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].result_text.as_deref(), Some("fresh"));
    }
}
