//! Embedded SQLite storage.
//!
//! One [`Database`] handle owns the connection behind a coarse-grained
//! lock; every query runs on the blocking pool. Instants are stored as
//! RFC 3339 text, channel flags and results as JSON text columns decoded
//! at this boundary.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use crate::domain::{
    ChannelFlags, ChannelSettings, ExecutionLogEntry, ExecutionStatus, IntegrationSettings,
    LicenseAccount, NewExecutionLog, NewSchedule, ScheduleStatus, ScheduledPrompt, StatusCounts,
    hash_license_key,
};

/// SQLite-backed store for accounts, schedules, execution logs, and
/// integration settings.
#[derive(Clone)]
pub struct Database {
    db_path: PathBuf,
    // Coarse-grained locking for embedded usage
    sqlite: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sqlite_ready = self
            .sqlite
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false);
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .field("sqlite", &sqlite_ready)
            .finish()
    }
}

impl Database {
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            sqlite: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the database file and creates the schema idempotently.
    pub async fn init(&self) -> Result<()> {
        let sqlite = Arc::clone(&self.sqlite);
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = sqlite.lock().unwrap();
            if guard.is_none() {
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(&db_path)?;
                // WAL for concurrency; foreign keys for cascade deletes
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    "-- License Accounts Table
                    CREATE TABLE IF NOT EXISTS license_accounts (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        key_hash TEXT NOT NULL UNIQUE,
                        label TEXT,
                        active BOOLEAN NOT NULL DEFAULT 1,
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_accounts_active ON license_accounts(active);

                    -- Scheduled Prompts Table
                    CREATE TABLE IF NOT EXISTS scheduled_prompts (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        owner_id INTEGER NOT NULL REFERENCES license_accounts(id) ON DELETE CASCADE,
                        prompt_id INTEGER,
                        title TEXT NOT NULL,
                        content TEXT NOT NULL,
                        scheduled_at TEXT NOT NULL,
                        timezone TEXT NOT NULL,
                        display_time TEXT NOT NULL,
                        status TEXT NOT NULL DEFAULT 'pending',
                        channels_json TEXT NOT NULL DEFAULT '{}',
                        attempt_count INTEGER NOT NULL DEFAULT 0,
                        last_execution_at TEXT,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_schedules_owner ON scheduled_prompts(owner_id);
                    CREATE INDEX IF NOT EXISTS idx_schedules_owner_status ON scheduled_prompts(owner_id, status);
                    CREATE INDEX IF NOT EXISTS idx_schedules_due ON scheduled_prompts(status, scheduled_at);

                    -- Automation Logs Table (2-day retention, enforced by callers)
                    CREATE TABLE IF NOT EXISTS automation_logs (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        scheduled_prompt_id INTEGER NOT NULL REFERENCES scheduled_prompts(id) ON DELETE CASCADE,
                        execution_time TEXT NOT NULL,
                        status TEXT NOT NULL,
                        result_text TEXT,
                        channel_results_json TEXT,
                        error_message TEXT,
                        duration_ms INTEGER,
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_logs_schedule ON automation_logs(scheduled_prompt_id, created_at DESC);
                    CREATE INDEX IF NOT EXISTS idx_logs_created ON automation_logs(created_at);

                    -- Integration Settings Table
                    CREATE TABLE IF NOT EXISTS integration_settings (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        owner_id INTEGER NOT NULL REFERENCES license_accounts(id) ON DELETE CASCADE,
                        channel TEXT NOT NULL,
                        settings_json TEXT NOT NULL,
                        active BOOLEAN NOT NULL DEFAULT 1,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL,
                        UNIQUE(owner_id, channel)
                    );
                    CREATE INDEX IF NOT EXISTS idx_integrations_owner ON integration_settings(owner_id, active);
                    ",
                )?;
                *guard = Some(conn);
            }
            Ok(())
        })
        .await
        .context("Tokio spawn_blocking failed")??;

        Ok(())
    }

    /// Cheap connectivity check for readiness probes.
    pub async fn ping(&self) -> Result<()> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    // ------------------------------------------------------------------
    // License accounts
    // ------------------------------------------------------------------

    /// Inserts accounts for plaintext keys not seen before. Returns how
    /// many new accounts were created.
    pub async fn seed_license_keys(&self, keys: &[String]) -> Result<usize> {
        let hashes: Vec<String> = keys.iter().map(|k| hash_license_key(k)).collect();
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut created = 0;
            for hash in hashes {
                created += conn.execute(
                    "INSERT INTO license_accounts (key_hash, active, created_at)
                     VALUES (?1, 1, ?2)
                     ON CONFLICT(key_hash) DO NOTHING",
                    params![hash, now.to_rfc3339()],
                )?;
            }
            Ok(created)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Looks up an account by license-key digest.
    pub async fn find_account_by_key_hash(&self, key_hash: &str) -> Result<Option<LicenseAccount>> {
        let key_hash = key_hash.to_string();
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Option<LicenseAccount>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(
                "SELECT id, key_hash, label, active, created_at
                 FROM license_accounts WHERE key_hash = ?1",
            )?;
            let mut rows = stmt.query(params![key_hash])?;

            if let Some(row) = rows.next()? {
                Ok(Some(LicenseAccount {
                    id: row.get(0)?,
                    key_hash: row.get(1)?,
                    label: row.get(2)?,
                    active: row.get(3)?,
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                }))
            } else {
                Ok(None)
            }
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    // ------------------------------------------------------------------
    // Scheduled prompts
    // ------------------------------------------------------------------

    /// Inserts a schedule in `pending` state and returns the full record.
    pub async fn insert_schedule(&self, new: &NewSchedule) -> Result<ScheduledPrompt> {
        let new = new.clone();
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<ScheduledPrompt> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let channels_json = serde_json::to_string(&new.channels)?;
            conn.execute(
                "INSERT INTO scheduled_prompts
                 (owner_id, prompt_id, title, content, scheduled_at, timezone, display_time,
                  status, channels_json, attempt_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, 0, ?9, ?10)",
                params![
                    new.owner_id,
                    new.prompt_id,
                    new.title,
                    new.content,
                    new.scheduled_at.to_rfc3339(),
                    new.timezone,
                    new.display_time,
                    channels_json,
                    now.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )?;
            let id = conn.last_insert_rowid();

            Ok(ScheduledPrompt {
                id,
                owner_id: new.owner_id,
                prompt_id: new.prompt_id,
                title: new.title,
                content: new.content,
                scheduled_at: new.scheduled_at,
                timezone: new.timezone,
                display_time: new.display_time,
                status: ScheduleStatus::Pending,
                channels: new.channels,
                attempt_count: 0,
                last_execution_at: None,
                created_at: now,
                updated_at: now,
            })
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// One schedule, owner-scoped.
    pub async fn get_schedule(&self, owner_id: i64, id: i64) -> Result<Option<ScheduledPrompt>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Option<ScheduledPrompt>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scheduled_prompts WHERE owner_id = ?1 AND id = ?2"
            ))?;
            let mut rows = stmt.query(params![owner_id, id])?;

            if let Some(row) = rows.next()? {
                Ok(Some(schedule_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// All schedules for one owner, newest first.
    pub async fn list_schedules(&self, owner_id: i64) -> Result<Vec<ScheduledPrompt>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Vec<ScheduledPrompt>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scheduled_prompts
                 WHERE owner_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let mut rows = stmt.query(params![owner_id])?;

            let mut schedules = Vec::new();
            while let Some(row) = rows.next()? {
                schedules.push(schedule_from_row(row)?);
            }
            Ok(schedules)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Deletes a schedule (and, via cascade, its log entries). Returns
    /// whether a row was removed.
    pub async fn delete_schedule(&self, owner_id: i64, id: i64) -> Result<bool> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let affected = conn.execute(
                "DELETE FROM scheduled_prompts WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, id],
            )?;
            Ok(affected > 0)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Fresh count of live (pending or completed) schedules for an owner.
    ///
    /// Computed per call; the quota guard relies on there being no cached
    /// counters to drift.
    pub async fn count_live_schedules(&self, owner_id: i64) -> Result<u32> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<u32> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM scheduled_prompts
                 WHERE owner_id = ?1 AND status IN ('pending', 'completed')",
                params![owner_id],
                |row| row.get(0),
            )?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Schedule counts by status for one owner.
    pub async fn schedule_status_counts(&self, owner_id: i64) -> Result<StatusCounts> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<StatusCounts> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM scheduled_prompts
                 WHERE owner_id = ?1 GROUP BY status",
            )?;
            let mut rows = stmt.query(params![owner_id])?;

            let mut counts = StatusCounts::default();
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let n = u32::try_from(row.get::<_, i64>(1)?).unwrap_or(u32::MAX);
                counts.total += n;
                match ScheduleStatus::parse(&status) {
                    Some(ScheduleStatus::Pending) => counts.pending += n,
                    Some(ScheduleStatus::Completed) => counts.completed += n,
                    Some(ScheduleStatus::Failed) => counts.failed += n,
                    Some(ScheduleStatus::Cancelled) => counts.cancelled += n,
                    None => {}
                }
            }
            Ok(counts)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// All due schedules: pending, scheduled at or before `now` (inclusive
    /// boundary), owned by an active account. Oldest due first.
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPrompt>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Vec<ScheduledPrompt>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS_QUALIFIED} FROM scheduled_prompts s
                 JOIN license_accounts a ON a.id = s.owner_id
                 WHERE s.status = 'pending' AND s.scheduled_at <= ?1 AND a.active = 1
                 ORDER BY s.scheduled_at ASC, s.id ASC"
            ))?;
            let mut rows = stmt.query(params![now.to_rfc3339()])?;

            let mut schedules = Vec::new();
            while let Some(row) = rows.next()? {
                schedules.push(schedule_from_row(row)?);
            }
            Ok(schedules)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Records one execution attempt on the schedule row: new status,
    /// attempt counter bumped by one, last-execution instant set.
    pub async fn mark_schedule_executed(
        &self,
        id: i64,
        status: ScheduleStatus,
        executed_at: DateTime<Utc>,
    ) -> Result<()> {
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let affected = conn.execute(
                "UPDATE scheduled_prompts
                 SET status = ?1,
                     attempt_count = attempt_count + 1,
                     last_execution_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    executed_at.to_rfc3339(),
                    now.to_rfc3339(),
                    id
                ],
            )?;
            if affected == 0 {
                anyhow::bail!("schedule {} no longer exists", id);
            }
            Ok(())
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    // ------------------------------------------------------------------
    // Execution logs
    // ------------------------------------------------------------------

    /// Appends one execution log entry and returns its id.
    pub async fn append_execution_log(&self, log: &NewExecutionLog) -> Result<i64> {
        let log = log.clone();
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<i64> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let channel_results_json = log
                .channel_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO automation_logs
                 (scheduled_prompt_id, execution_time, status, result_text,
                  channel_results_json, error_message, duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    log.scheduled_prompt_id,
                    log.execution_time.to_rfc3339(),
                    log.status.as_str(),
                    log.result_text,
                    channel_results_json,
                    log.error_message,
                    log.duration_ms.map(|v| v as i64),
                    now.to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Log entries for one owner's schedule, newest first, created at or
    /// after `cutoff`. The cutoff keeps expired rows invisible even before
    /// the purge removes them.
    pub async fn list_execution_logs(
        &self,
        owner_id: i64,
        schedule_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Vec<ExecutionLogEntry>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(
                "SELECT l.id, l.scheduled_prompt_id, l.execution_time, l.status, l.result_text,
                        l.channel_results_json, l.error_message, l.duration_ms, l.created_at
                 FROM automation_logs l
                 JOIN scheduled_prompts s ON s.id = l.scheduled_prompt_id
                 WHERE s.owner_id = ?1 AND l.scheduled_prompt_id = ?2 AND l.created_at >= ?3
                 ORDER BY l.created_at DESC, l.id DESC",
            )?;
            let mut rows = stmt.query(params![owner_id, schedule_id, cutoff.to_rfc3339()])?;

            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                let channel_results = row
                    .get::<_, Option<String>>(5)?
                    .map(|json| serde_json::from_str(&json))
                    .transpose()?;
                entries.push(ExecutionLogEntry {
                    id: row.get(0)?,
                    scheduled_prompt_id: row.get(1)?,
                    execution_time: parse_datetime(row.get::<_, String>(2)?),
                    status: parse_execution_status(&row.get::<_, String>(3)?)?,
                    result_text: row.get(4)?,
                    channel_results,
                    error_message: row.get(6)?,
                    duration_ms: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
                    created_at: parse_datetime(row.get::<_, String>(8)?),
                });
            }
            Ok(entries)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Deletes log entries created before `cutoff`. Returns how many rows
    /// were removed.
    pub async fn purge_expired_logs(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let affected = conn.execute(
                "DELETE FROM automation_logs WHERE created_at < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(affected)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    // ------------------------------------------------------------------
    // Integration settings
    // ------------------------------------------------------------------

    /// Creates or replaces the settings for (owner, channel) and
    /// reactivates them if they were soft-deleted.
    pub async fn upsert_integration(
        &self,
        owner_id: i64,
        settings: &ChannelSettings,
    ) -> Result<IntegrationSettings> {
        let settings = settings.clone();
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<IntegrationSettings> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let settings_json = serde_json::to_string(&settings)?;
            conn.execute(
                "INSERT INTO integration_settings
                 (owner_id, channel, settings_json, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)
                 ON CONFLICT(owner_id, channel) DO UPDATE SET
                   settings_json = excluded.settings_json,
                   active = 1,
                   updated_at = excluded.updated_at",
                params![
                    owner_id,
                    settings.channel().as_str(),
                    settings_json,
                    now.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, owner_id, settings_json, active, created_at, updated_at
                 FROM integration_settings WHERE owner_id = ?1 AND channel = ?2",
            )?;
            let mut rows = stmt.query(params![owner_id, settings.channel().as_str()])?;
            let row = rows
                .next()?
                .ok_or_else(|| anyhow::anyhow!("integration settings vanished after upsert"))?;
            integration_from_row(row)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Active settings for (owner, channel), if configured.
    pub async fn get_active_integration(
        &self,
        owner_id: i64,
        channel: crate::domain::Channel,
    ) -> Result<Option<IntegrationSettings>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Option<IntegrationSettings>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(
                "SELECT id, owner_id, settings_json, active, created_at, updated_at
                 FROM integration_settings
                 WHERE owner_id = ?1 AND channel = ?2 AND active = 1",
            )?;
            let mut rows = stmt.query(params![owner_id, channel.as_str()])?;

            if let Some(row) = rows.next()? {
                Ok(Some(integration_from_row(row)?))
            } else {
                Ok(None)
            }
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// All active settings for one owner, by channel name.
    pub async fn list_integrations(&self, owner_id: i64) -> Result<Vec<IntegrationSettings>> {
        let sqlite = Arc::clone(&self.sqlite);

        tokio::task::spawn_blocking(move || -> Result<Vec<IntegrationSettings>> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let mut stmt = conn.prepare(
                "SELECT id, owner_id, settings_json, active, created_at, updated_at
                 FROM integration_settings
                 WHERE owner_id = ?1 AND active = 1
                 ORDER BY channel ASC",
            )?;
            let mut rows = stmt.query(params![owner_id])?;

            let mut settings = Vec::new();
            while let Some(row) = rows.next()? {
                settings.push(integration_from_row(row)?);
            }
            Ok(settings)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }

    /// Soft-deletes the settings for (owner, channel). Returns whether an
    /// active row was deactivated.
    pub async fn deactivate_integration(
        &self,
        owner_id: i64,
        channel: crate::domain::Channel,
    ) -> Result<bool> {
        let sqlite = Arc::clone(&self.sqlite);
        let now = Utc::now();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let guard = sqlite.lock().unwrap();
            let conn = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("SQLite not initialized"))?;

            let affected = conn.execute(
                "UPDATE integration_settings
                 SET active = 0, updated_at = ?1
                 WHERE owner_id = ?2 AND channel = ?3 AND active = 1",
                params![now.to_rfc3339(), owner_id, channel.as_str()],
            )?;
            Ok(affected > 0)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }
}

const SCHEDULE_COLUMNS: &str = "id, owner_id, prompt_id, title, content, scheduled_at, timezone, \
     display_time, status, channels_json, attempt_count, last_execution_at, created_at, updated_at";

const SCHEDULE_COLUMNS_QUALIFIED: &str = "s.id, s.owner_id, s.prompt_id, s.title, s.content, \
     s.scheduled_at, s.timezone, s.display_time, s.status, s.channels_json, s.attempt_count, \
     s.last_execution_at, s.created_at, s.updated_at";

fn schedule_from_row(row: &Row<'_>) -> Result<ScheduledPrompt> {
    let status_text: String = row.get(8)?;
    let status = ScheduleStatus::parse(&status_text)
        .ok_or_else(|| anyhow::anyhow!("unknown schedule status '{}'", status_text))?;
    let channels: ChannelFlags = serde_json::from_str(&row.get::<_, String>(9)?)?;

    Ok(ScheduledPrompt {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        prompt_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        scheduled_at: parse_datetime(row.get::<_, String>(5)?),
        timezone: row.get(6)?,
        display_time: row.get(7)?,
        status,
        channels,
        attempt_count: row.get(10)?,
        last_execution_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(12)?),
        updated_at: parse_datetime(row.get::<_, String>(13)?),
    })
}

fn integration_from_row(row: &Row<'_>) -> Result<IntegrationSettings> {
    let settings: ChannelSettings = serde_json::from_str(&row.get::<_, String>(2)?)?;
    Ok(IntegrationSettings {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        settings,
        active: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        updated_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

fn parse_execution_status(value: &str) -> Result<ExecutionStatus> {
    ExecutionStatus::parse(value)
        .ok_or_else(|| anyhow::anyhow!("unknown execution status '{}'", value))
}

fn parse_datetime(value: String) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(err) => {
            tracing::warn!(%value, "Stored timestamp is not RFC 3339 ({err}), using now");
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Channel, ChannelResults};
    use chrono::Duration;

    async fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("promptpilot.db"));
        db.init().await.expect("init");
        (dir, db)
    }

    async fn seed_owner(db: &Database, key: &str) -> i64 {
        db.seed_license_keys(&[key.to_string()]).await.expect("seed");
        db.find_account_by_key_hash(&hash_license_key(key))
            .await
            .expect("lookup")
            .expect("account")
            .id
    }

    fn new_schedule(owner_id: i64, scheduled_at: DateTime<Utc>) -> NewSchedule {
        NewSchedule {
            owner_id,
            prompt_id: None,
            title: "Morning digest".to_string(),
            content: "Summarize my bookmarks".to_string(),
            scheduled_at,
            timezone: "UTC".to_string(),
            display_time: scheduled_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            channels: ChannelFlags::default(),
        }
    }

    #[tokio::test]
    async fn test_uninitialized_database_errors() {
        let db = Database::new("/nonexistent/never-opened.db");
        let err = db.count_live_schedules(1).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (_dir, db) = open_test_db().await;
        let keys = vec!["pp-alpha".to_string(), "pp-beta".to_string()];
        assert_eq!(db.seed_license_keys(&keys).await.unwrap(), 2);
        assert_eq!(db.seed_license_keys(&keys).await.unwrap(), 0);

        let account = db
            .find_account_by_key_hash(&hash_license_key("pp-alpha"))
            .await
            .unwrap()
            .expect("seeded account");
        assert!(account.active);
        assert!(
            db.find_account_by_key_hash(&hash_license_key("pp-unknown"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_schedule_insert_get_list_delete() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let other = seed_owner(&db, "pp-other").await;

        let at = Utc::now() + Duration::hours(2);
        let created = db.insert_schedule(&new_schedule(owner, at)).await.unwrap();
        assert_eq!(created.status, ScheduleStatus::Pending);
        assert_eq!(created.attempt_count, 0);

        let fetched = db.get_schedule(owner, created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Morning digest");
        assert_eq!(fetched.scheduled_at, created.scheduled_at);

        // Owner scoping: another account cannot see or delete it
        assert!(db.get_schedule(other, created.id).await.unwrap().is_none());
        assert!(!db.delete_schedule(other, created.id).await.unwrap());

        assert_eq!(db.list_schedules(owner).await.unwrap().len(), 1);
        assert!(db.delete_schedule(owner, created.id).await.unwrap());
        assert!(db.list_schedules(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_count_tracks_pending_and_completed_only() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let at = Utc::now() + Duration::hours(1);

        let a = db.insert_schedule(&new_schedule(owner, at)).await.unwrap();
        let b = db.insert_schedule(&new_schedule(owner, at)).await.unwrap();
        db.insert_schedule(&new_schedule(owner, at)).await.unwrap();
        assert_eq!(db.count_live_schedules(owner).await.unwrap(), 3);

        db.mark_schedule_executed(a.id, ScheduleStatus::Completed, Utc::now())
            .await
            .unwrap();
        assert_eq!(db.count_live_schedules(owner).await.unwrap(), 3);

        db.mark_schedule_executed(b.id, ScheduleStatus::Failed, Utc::now())
            .await
            .unwrap();
        assert_eq!(db.count_live_schedules(owner).await.unwrap(), 2);

        let counts = db.schedule_status_counts(owner).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn test_live_count_is_stable_between_calls() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let at = Utc::now() + Duration::hours(1);
        db.insert_schedule(&new_schedule(owner, at)).await.unwrap();
        db.insert_schedule(&new_schedule(owner, at)).await.unwrap();

        // Back-to-back checks with no intervening write agree
        let first = db.count_live_schedules(owner).await.unwrap();
        let second = db.count_live_schedules(owner).await.unwrap();
        assert_eq!(first, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_datetime_falls_back_on_corrupt_text() {
        let exact = parse_datetime("2026-05-01T12:00:00+00:00".to_string());
        assert_eq!(exact.to_rfc3339(), "2026-05-01T12:00:00+00:00");

        let before = Utc::now();
        let substituted = parse_datetime("garbage".to_string());
        assert!(substituted >= before);
    }

    #[tokio::test]
    async fn test_due_query_inclusive_boundary_and_order() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let now = Utc::now();

        let later = db
            .insert_schedule(&new_schedule(owner, now - Duration::minutes(5)))
            .await
            .unwrap();
        let earlier = db
            .insert_schedule(&new_schedule(owner, now - Duration::minutes(10)))
            .await
            .unwrap();
        let boundary = db.insert_schedule(&new_schedule(owner, now)).await.unwrap();
        db.insert_schedule(&new_schedule(owner, now + Duration::minutes(1)))
            .await
            .unwrap();

        let due = db.due_schedules(now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
        // Oldest scheduled_at first; the exactly-now schedule is included
        assert_eq!(ids, vec![earlier.id, later.id, boundary.id]);
    }

    #[tokio::test]
    async fn test_due_query_skips_non_pending_and_inactive_owners() {
        let (dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let now = Utc::now();

        let done = db
            .insert_schedule(&new_schedule(owner, now - Duration::minutes(3)))
            .await
            .unwrap();
        db.mark_schedule_executed(done.id, ScheduleStatus::Completed, now)
            .await
            .unwrap();
        let pending = db
            .insert_schedule(&new_schedule(owner, now - Duration::minutes(3)))
            .await
            .unwrap();

        let due = db.due_schedules(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, pending.id);

        // Deactivate the owner out of band; its pending schedule drops out
        let conn = Connection::open(dir.path().join("promptpilot.db")).unwrap();
        conn.execute("UPDATE license_accounts SET active = 0 WHERE id = ?1", params![owner])
            .unwrap();
        drop(conn);

        assert!(db.due_schedules(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_executed_bumps_attempts() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let s = db
            .insert_schedule(&new_schedule(owner, Utc::now()))
            .await
            .unwrap();

        let executed_at = Utc::now();
        db.mark_schedule_executed(s.id, ScheduleStatus::Completed, executed_at)
            .await
            .unwrap();

        let after = db.get_schedule(owner, s.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Completed);
        assert_eq!(after.attempt_count, 1);
        assert!(after.last_execution_at.is_some());
    }

    #[tokio::test]
    async fn test_log_append_list_and_retention() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let s = db
            .insert_schedule(&new_schedule(owner, Utc::now()))
            .await
            .unwrap();

        let mut results = ChannelResults::new();
        results.insert(
            "telegram".to_string(),
            crate::domain::ChannelDelivery::failed("telegram settings not configured"),
        );
        db.append_execution_log(&NewExecutionLog {
            scheduled_prompt_id: s.id,
            execution_time: Utc::now(),
            status: ExecutionStatus::Success,
            result_text: Some("All done".to_string()),
            channel_results: Some(results),
            error_message: None,
            duration_ms: Some(1200),
        })
        .await
        .unwrap();

        let cutoff = Utc::now() - Duration::days(2);
        let entries = db.list_execution_logs(owner, s.id, cutoff).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ExecutionStatus::Success);
        assert_eq!(entries[0].duration_ms, Some(1200));
        let channel_results = entries[0].channel_results.as_ref().unwrap();
        assert!(!channel_results["telegram"].delivered);

        // A cutoff in the future hides the entry; purge then removes it
        let future_cutoff = Utc::now() + Duration::seconds(5);
        assert!(
            db.list_execution_logs(owner, s.id, future_cutoff)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(db.purge_expired_logs(future_cutoff).await.unwrap(), 1);
        assert!(
            db.list_execution_logs(owner, s.id, cutoff)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_log_cascade_on_schedule_delete() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;
        let s = db
            .insert_schedule(&new_schedule(owner, Utc::now()))
            .await
            .unwrap();
        db.append_execution_log(&NewExecutionLog {
            scheduled_prompt_id: s.id,
            execution_time: Utc::now(),
            status: ExecutionStatus::Failed,
            result_text: None,
            channel_results: None,
            error_message: Some("engine unavailable".to_string()),
            duration_ms: Some(40),
        })
        .await
        .unwrap();

        assert!(db.delete_schedule(owner, s.id).await.unwrap());
        // Cascade removed the log rows, so nothing is left to purge
        let removed = db
            .purge_expired_logs(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_integration_upsert_get_deactivate() {
        let (_dir, db) = open_test_db().await;
        let owner = seed_owner(&db, "pp-owner").await;

        let first = db
            .upsert_integration(
                owner,
                &ChannelSettings::Discord {
                    webhook_url: "https://discord.com/api/webhooks/1/aaa".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(first.active);

        // Upsert replaces in place, keeping one row per (owner, channel)
        let second = db
            .upsert_integration(
                owner,
                &ChannelSettings::Discord {
                    webhook_url: "https://discord.com/api/webhooks/1/bbb".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        match &second.settings {
            ChannelSettings::Discord { webhook_url } => {
                assert!(webhook_url.ends_with("/bbb"));
            }
            ChannelSettings::Telegram { .. } => panic!("channel changed"),
        }

        assert!(
            db.get_active_integration(owner, Channel::Discord)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            db.get_active_integration(owner, Channel::Telegram)
                .await
                .unwrap()
                .is_none()
        );

        assert!(db.deactivate_integration(owner, Channel::Discord).await.unwrap());
        assert!(!db.deactivate_integration(owner, Channel::Discord).await.unwrap());
        assert!(
            db.get_active_integration(owner, Channel::Discord)
                .await
                .unwrap()
                .is_none()
        );
        assert!(db.list_integrations(owner).await.unwrap().is_empty());

        // Re-upsert reactivates the soft-deleted row
        let revived = db
            .upsert_integration(
                owner,
                &ChannelSettings::Discord {
                    webhook_url: "https://discord.com/api/webhooks/1/ccc".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(revived.active);
        assert_eq!(revived.id, first.id);
    }
}
