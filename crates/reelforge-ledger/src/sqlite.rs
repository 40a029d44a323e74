//! SQLite-backed implementation of the [`Ledger`] trait.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::Ledger;
use reelforge_core::types::*;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite ledger. One connection behind a mutex; statements are short.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> ForgeError {
    ForgeError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn local_ts(at: NaiveDateTime) -> String {
    at.format(LOCAL_TIME_FORMAT).to_string()
}

impl SqliteLedger {
    /// Open or create the ledger database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        tracing::info!("🗄️ Ledger opened at {}", path.display());
        Ok(ledger)
    }

    /// Private in-memory ledger, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ForgeError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,          -- JSON, blanked by pruning
                origin TEXT NOT NULL,           -- manual, schedule, radar
                status TEXT NOT NULL,           -- scraping .. completed, failed
                target_channel_id TEXT,
                error TEXT,
                attempt INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status_updated ON tasks(status, updated_at);

            -- Append-only status history
            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                error TEXT,
                at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id);

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                platform TEXT NOT NULL DEFAULT 'youtube',
                niche TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                credential_blob TEXT,           -- serialized browser session
                last_refreshed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                platform TEXT NOT NULL,
                payload TEXT NOT NULL,
                publish_time_local TEXT NOT NULL,
                status TEXT NOT NULL,           -- scheduled, processing, published, failed
                target_channel_id TEXT,
                error TEXT,
                updated_at TEXT NOT NULL
            );

            -- Publish attempts per channel, read by the rate limiter
            CREATE TABLE IF NOT EXISTS dispatch_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                at TEXT NOT NULL,
                UNIQUE(channel_id, task_id)
            );
            CREATE INDEX IF NOT EXISTS idx_dispatch_channel_at ON dispatch_log(channel_id, at);

            CREATE TABLE IF NOT EXISTS contents (
                task_id TEXT PRIMARY KEY,
                channel_id TEXT,
                title TEXT NOT NULL,
                script TEXT NOT NULL,
                published_url TEXT NOT NULL,
                published_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS content_variants (
                id TEXT PRIMARY KEY,
                parent_task_id TEXT NOT NULL,
                kind TEXT NOT NULL,             -- title, thumbnail_prompt
                content TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                observed_performance REAL NOT NULL DEFAULT 0,
                swapped_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_variants_parent ON content_variants(parent_task_id, kind);

            CREATE TABLE IF NOT EXISTS performance_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                ctr REAL NOT NULL,
                views INTEGER NOT NULL DEFAULT 0,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patches (
                asset_id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                solution TEXT NOT NULL,
                at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| ForgeError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Upsert with an explicit `updated_at`. [`Ledger::upsert_task`] passes now.
    pub fn upsert_task_at(&self, task: &Task, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let previous: Option<(String, u32)> = tx
            .query_row(
                "SELECT status, attempt FROM tasks WHERE id = ?1",
                [&task.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        tx.execute(
            "INSERT INTO tasks
                (id, created_at, kind, payload, origin, status, target_channel_id, error, attempt, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                status = excluded.status,
                error = excluded.error,
                attempt = excluded.attempt,
                target_channel_id = COALESCE(excluded.target_channel_id, tasks.target_channel_id),
                updated_at = excluded.updated_at",
            params![
                task.id,
                ts(task.created_at),
                task.kind,
                task.payload.to_string(),
                task.origin.as_str(),
                task.status.as_str(),
                task.target_channel_id,
                task.error,
                task.attempt,
                ts(at),
            ],
        )
        .map_err(db_err)?;

        let changed = match &previous {
            Some((status, attempt)) => status != task.status.as_str() || *attempt != task.attempt,
            None => true,
        };
        if changed {
            tx.execute(
                "INSERT INTO task_events (task_id, status, attempt, error, at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![task.id, task.status.as_str(), task.attempt, task.error, ts(at)],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn query_tasks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, task_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn query_schedules<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ScheduleEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, schedule_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn query_variants<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ContentVariant>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, variant_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

const TASK_COLUMNS: &str =
    "id, created_at, kind, payload, origin, status, target_channel_id, error, attempt, updated_at";

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let payload_str: String = row.get(3)?;
    let origin: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown task status '{status_str}'").into(),
        )
    })?;
    Ok(Task {
        id: row.get(0)?,
        created_at: parse_ts(&row.get::<_, String>(1)?),
        kind: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        origin: TaskOrigin::parse(&origin),
        status,
        target_channel_id: row.get(6)?,
        error: row.get(7)?,
        attempt: row.get(8)?,
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

const SCHEDULE_COLUMNS: &str =
    "id, title, platform, payload, publish_time_local, status, target_channel_id, error";

fn schedule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let payload_str: String = row.get(3)?;
    let time_str: String = row.get(4)?;
    let publish_time_local = NaiveDateTime::parse_from_str(&time_str, LOCAL_TIME_FORMAT)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(ScheduleEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        platform: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        publish_time_local,
        status: ScheduleStatus::parse(&row.get::<_, String>(5)?),
        target_channel_id: row.get(6)?,
        error: row.get(7)?,
    })
}

const VARIANT_COLUMNS: &str =
    "id, parent_task_id, kind, content, is_active, observed_performance, swapped_at";

fn variant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentVariant> {
    Ok(ContentVariant {
        id: row.get(0)?,
        parent_task_id: row.get(1)?,
        kind: VariantKind::parse(&row.get::<_, String>(2)?),
        content: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
        observed_performance: row.get(5)?,
        swapped_at: parse_opt_ts(row.get(6)?),
    })
}

fn channel_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        display_name: row.get(1)?,
        platform: row.get(2)?,
        niche: row.get(3)?,
        status: ChannelStatus::parse(&row.get::<_, String>(4)?),
        credential_blob: row.get(5)?,
        last_refreshed_at: parse_opt_ts(row.get(6)?),
    })
}

fn content_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentSummary> {
    Ok(ContentSummary {
        task_id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get(2)?,
        script: row.get(3)?,
        published_url: row.get(4)?,
        published_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

impl Ledger for SqliteLedger {
    // ─── Tasks ──────────────────────────────────────────────

    fn upsert_task(&self, task: &Task) -> Result<()> {
        self.upsert_task_at(task, Utc::now())
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        Ok(self.query_tasks(&sql, [id])?.into_iter().next())
    }

    fn list_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC LIMIT ?1");
        self.query_tasks(&sql, [limit as i64])
    }

    fn list_stale(&self, statuses: &[TaskStatus], older_than: DateTime<Utc>) -> Result<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        // ?1 is the threshold, ?2.. one per status.
        let placeholders: Vec<String> = (2..statuses.len() + 2).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE updated_at < ?1 AND status IN ({}) ORDER BY updated_at",
            placeholders.join(", ")
        );
        let mut values = vec![ts(older_than)];
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        self.query_tasks(&sql, params_from_iter(values))
    }

    fn list_tasks_by_origin(&self, origin: TaskOrigin, limit: usize) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE origin = ?1 ORDER BY created_at DESC LIMIT ?2");
        self.query_tasks(&sql, params![origin.as_str(), limit as i64])
    }

    fn task_history(&self, id: &str) -> Result<Vec<TaskEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT task_id, status, attempt, error, at FROM task_events WHERE task_id = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([id], |row| {
                let status_str: String = row.get(1)?;
                Ok(TaskEvent {
                    task_id: row.get(0)?,
                    status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
                    attempt: row.get(2)?,
                    error: row.get(3)?,
                    at: parse_ts(&row.get::<_, String>(4)?),
                })
            })
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn prune_payloads(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE tasks SET payload = 'null'
                 WHERE status IN ('completed', 'failed') AND updated_at < ?1 AND payload != 'null'",
                [ts(older_than)],
            )
            .map_err(db_err)?;
        if n > 0 {
            tracing::debug!("🧹 Pruned {} task payloads", n);
        }
        Ok(n)
    }

    // ─── Channels ───────────────────────────────────────────

    fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO channels
                (id, display_name, platform, niche, status, credential_blob, last_refreshed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                platform = excluded.platform,
                niche = excluded.niche,
                status = excluded.status,
                credential_blob = COALESCE(excluded.credential_blob, channels.credential_blob),
                last_refreshed_at = COALESCE(excluded.last_refreshed_at, channels.last_refreshed_at)",
            params![
                channel.id,
                channel.display_name,
                channel.platform,
                channel.niche,
                channel.status.as_str(),
                channel.credential_blob,
                channel.last_refreshed_at.map(ts),
                ts(Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, display_name, platform, niche, status, credential_blob, last_refreshed_at
             FROM channels WHERE id = ?1",
            [id],
            channel_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, display_name, platform, niche, status, credential_blob, last_refreshed_at
                 FROM channels ORDER BY created_at, id",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], channel_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn refresh_credentials(&self, id: &str, blob: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE channels SET credential_blob = ?1, last_refreshed_at = ?2 WHERE id = ?3",
                params![blob, ts(at), id],
            )
            .map_err(db_err)?;
        if n == 0 {
            return Err(ForgeError::NotFound(format!("channel '{id}'")));
        }
        Ok(())
    }

    // ─── Schedules ──────────────────────────────────────────

    fn upsert_schedule(&self, entry: &ScheduleEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO schedules
                (id, title, platform, payload, publish_time_local, status, target_channel_id, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                platform = excluded.platform,
                payload = excluded.payload,
                publish_time_local = excluded.publish_time_local,
                status = excluded.status,
                target_channel_id = COALESCE(excluded.target_channel_id, schedules.target_channel_id),
                error = excluded.error,
                updated_at = excluded.updated_at",
            params![
                entry.id,
                entry.title,
                entry.platform,
                entry.payload.to_string(),
                local_ts(entry.publish_time_local),
                entry.status.as_str(),
                entry.target_channel_id,
                entry.error,
                ts(Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn list_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY publish_time_local");
        self.query_schedules(&sql, [])
    }

    fn delete_schedule(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM schedules WHERE id = ?1", [id])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    fn list_pending_schedule(&self, now: NaiveDateTime) -> Result<Vec<ScheduleEntry>> {
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE status = 'scheduled' AND publish_time_local <= ?1
             ORDER BY publish_time_local"
        );
        self.query_schedules(&sql, [local_ts(now)])
    }

    fn claim_schedule(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE schedules SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'scheduled'",
                params![ts(Utc::now()), id],
            )
            .map_err(db_err)?;
        Ok(n == 1)
    }

    fn finish_schedule(&self, id: &str, status: ScheduleStatus, error: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE schedules SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error, ts(Utc::now()), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ─── Rate-limit log ─────────────────────────────────────

    fn record_dispatch(&self, channel_id: &str, task_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO dispatch_log (channel_id, task_id, at) VALUES (?1, ?2, ?3)",
            params![channel_id, task_id, ts(at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn release_dispatch(&self, channel_id: &str, task_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "DELETE FROM dispatch_log WHERE channel_id = ?1 AND task_id = ?2",
                params![channel_id, task_id],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    fn count_dispatches(&self, channel_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dispatch_log WHERE channel_id = ?1 AND at > ?2",
            params![channel_id, ts(since)],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    // ─── Published content & variants ───────────────────────

    fn record_content(&self, summary: &ContentSummary) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO contents
                (task_id, channel_id, title, script, published_url, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.task_id,
                summary.channel_id,
                summary.title,
                summary.script,
                summary.published_url,
                ts(summary.published_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_content(&self, task_id: &str) -> Result<Option<ContentSummary>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT task_id, channel_id, title, script, published_url, published_at
             FROM contents WHERE task_id = ?1",
            [task_id],
            content_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn recent_contents(&self, since: DateTime<Utc>) -> Result<Vec<ContentSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT task_id, channel_id, title, script, published_url, published_at
                 FROM contents WHERE published_at > ?1 ORDER BY published_at",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([ts(since)], content_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn insert_variants(&self, variants: &[ContentVariant]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        for v in variants {
            tx.execute(
                "INSERT OR IGNORE INTO content_variants
                    (id, parent_task_id, kind, content, is_active, observed_performance, swapped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    v.id,
                    v.parent_task_id,
                    v.kind.as_str(),
                    v.content,
                    v.is_active as i32,
                    v.observed_performance,
                    v.swapped_at.map(ts),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn list_variants(&self, parent_task_id: &str) -> Result<Vec<ContentVariant>> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM content_variants WHERE parent_task_id = ?1 ORDER BY rowid"
        );
        self.query_variants(&sql, [parent_task_id])
    }

    fn next_unused_variant(&self, parent_task_id: &str, kind: VariantKind) -> Result<Option<ContentVariant>> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM content_variants
             WHERE parent_task_id = ?1 AND kind = ?2 AND is_active = 0 AND swapped_at IS NULL
             ORDER BY rowid LIMIT 1"
        );
        Ok(self
            .query_variants(&sql, params![parent_task_id, kind.as_str()])?
            .into_iter()
            .next())
    }

    fn activate_variant(&self, variant_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let target: Option<(String, String)> = tx
            .query_row(
                "SELECT parent_task_id, kind FROM content_variants WHERE id = ?1",
                [variant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((parent, kind)) = target else {
            return Err(ForgeError::NotFound(format!("variant '{variant_id}'")));
        };
        tx.execute(
            "UPDATE content_variants SET is_active = 0 WHERE parent_task_id = ?1 AND kind = ?2",
            params![parent, kind],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE content_variants SET is_active = 1, swapped_at = ?1 WHERE id = ?2",
            params![ts(at), variant_id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn set_variant_performance(&self, variant_id: &str, performance: f64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE content_variants SET observed_performance = ?1 WHERE id = ?2",
            params![performance, variant_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ─── Metrics ────────────────────────────────────────────

    fn record_metric(&self, sample: &PerformanceSample) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO performance_metrics (task_id, ctr, views, at) VALUES (?1, ?2, ?3, ?4)",
            params![sample.task_id, sample.ctr, sample.views as i64, ts(sample.at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn latest_metric(&self, task_id: &str) -> Result<Option<PerformanceSample>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT task_id, ctr, views, at FROM performance_metrics
             WHERE task_id = ?1 ORDER BY at DESC, id DESC LIMIT 1",
            [task_id],
            |row| {
                Ok(PerformanceSample {
                    task_id: row.get(0)?,
                    ctr: row.get(1)?,
                    views: row.get::<_, i64>(2)?.max(0) as u64,
                    at: parse_ts(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    // ─── Patch cache ────────────────────────────────────────

    fn record_patch(&self, asset_id: &str, query: &str, solution: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO patches (asset_id, query, solution, at) VALUES (?1, ?2, ?3, ?4)",
            params![asset_id, query, solution, ts(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn cached_patch(&self, query: &str) -> Result<Option<CachedPatch>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT asset_id, query, solution, at FROM patches WHERE query = ?1 ORDER BY at DESC LIMIT 1",
            [query],
            |row| {
                Ok(CachedPatch {
                    asset_id: row.get(0)?,
                    query: row.get(1)?,
                    solution: row.get(2)?,
                    at: parse_ts(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_task(id: &str) -> Task {
        Task::new(
            id,
            serde_json::json!({"source_url": "https://example.com/v/1", "title": "Host"}),
            TaskOrigin::Manual,
            Some("c1".into()),
        )
    }

    fn local(h: u32, m: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn entry(id: &str, at: NaiveDateTime) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            title: "Morning drop".into(),
            platform: "youtube".into(),
            payload: serde_json::json!({"source_url": "https://example.com/v/2"}),
            publish_time_local: at,
            status: ScheduleStatus::Scheduled,
            target_channel_id: Some("c1".into()),
            error: None,
        }
    }

    #[test]
    fn test_open_file_backed() {
        let dir = std::env::temp_dir().join(format!("reelforge-ledger-{}", std::process::id()));
        let ledger = SqliteLedger::open(&dir.join("ledger.db")).unwrap();
        assert!(ledger.list_tasks(10).unwrap().is_empty());
        drop(ledger);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_upsert_is_insert_or_update() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut task = sample_task("t1");
        ledger.upsert_task(&task).unwrap();

        task.status = TaskStatus::Mutating;
        ledger.upsert_task(&task).unwrap();

        let tasks = ledger.list_tasks(10).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Mutating);
        assert_eq!(tasks[0].target_channel_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_upsert_refreshes_updated_at_and_keeps_channel() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut task = sample_task("t1");
        let early = Utc::now() - Duration::minutes(30);
        ledger.upsert_task_at(&task, early).unwrap();

        task.target_channel_id = None;
        task.status = TaskStatus::Muxing;
        ledger.upsert_task(&task).unwrap();

        let stored = ledger.get_task("t1").unwrap().unwrap();
        assert!(stored.updated_at > early);
        assert_eq!(stored.target_channel_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_history_records_only_changes() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut task = sample_task("t1");
        ledger.upsert_task(&task).unwrap();
        ledger.upsert_task(&task).unwrap();
        task.status = TaskStatus::Mutating;
        ledger.upsert_task(&task).unwrap();
        task.status = TaskStatus::Failed;
        task.error = Some("validation error: empty".into());
        ledger.upsert_task(&task).unwrap();

        let history = ledger.task_history("t1").unwrap();
        let statuses: Vec<TaskStatus> = history.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Scraping, TaskStatus::Mutating, TaskStatus::Failed]
        );
        assert_eq!(history[2].error.as_deref(), Some("validation error: empty"));
    }

    #[test]
    fn test_list_stale_filters_status_and_age() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let old = Utc::now() - Duration::minutes(10);

        let mut stuck = sample_task("stuck");
        stuck.status = TaskStatus::Uploading;
        ledger.upsert_task_at(&stuck, old).unwrap();

        let mut done = sample_task("done");
        done.status = TaskStatus::Completed;
        ledger.upsert_task_at(&done, old).unwrap();

        let fresh = sample_task("fresh");
        ledger.upsert_task(&fresh).unwrap();

        let threshold = Utc::now() - Duration::minutes(5);
        let stale = ledger.list_stale(&TaskStatus::IN_FLIGHT, threshold).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "stuck");
    }

    #[test]
    fn test_list_stale_skips_old_terminal_rows() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(3);
        for i in 0..50 {
            let mut task = sample_task(&format!("done{i}"));
            task.status = if i % 2 == 0 { TaskStatus::Completed } else { TaskStatus::Failed };
            ledger.upsert_task_at(&task, old).unwrap();
        }
        let mut muxing = sample_task("muxing");
        muxing.status = TaskStatus::Muxing;
        ledger.upsert_task_at(&muxing, old - Duration::minutes(1)).unwrap();
        let mut scraping = sample_task("scraping");
        scraping.status = TaskStatus::Scraping;
        ledger.upsert_task_at(&scraping, old).unwrap();

        let threshold = Utc::now() - Duration::hours(1);
        let ids: Vec<String> = ledger
            .list_stale(&TaskStatus::IN_FLIGHT, threshold)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["muxing", "scraping"]);

        let only_muxing = ledger.list_stale(&[TaskStatus::Muxing], threshold).unwrap();
        assert_eq!(only_muxing.len(), 1);
        assert!(ledger.list_stale(&[], threshold).unwrap().is_empty());
    }

    #[test]
    fn test_prune_only_terminal_payloads() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(40);
        let mut done = sample_task("done");
        done.status = TaskStatus::Completed;
        ledger.upsert_task_at(&done, old).unwrap();
        let mut running = sample_task("running");
        running.status = TaskStatus::Muxing;
        ledger.upsert_task_at(&running, old).unwrap();

        let pruned = ledger.prune_payloads(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(pruned, 1);
        assert!(ledger.get_task("done").unwrap().unwrap().payload.is_null());
        assert!(!ledger.get_task("running").unwrap().unwrap().payload.is_null());
    }

    #[test]
    fn test_channel_credentials_preserved_on_reregister() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let channel = Channel::new("c1", "Main", "tech");
        ledger.upsert_channel(&channel).unwrap();
        let at = Utc::now();
        ledger.refresh_credentials("c1", "[{\"name\":\"SID\"}]", at).unwrap();

        let mut renamed = channel.clone();
        renamed.display_name = "Main Channel".into();
        ledger.upsert_channel(&renamed).unwrap();

        let stored = ledger.get_channel("c1").unwrap().unwrap();
        assert_eq!(stored.display_name, "Main Channel");
        assert_eq!(stored.credential_blob.as_deref(), Some("[{\"name\":\"SID\"}]"));
        assert!(stored.last_refreshed_at.is_some());
        assert!(ledger.refresh_credentials("missing", "x", at).is_err());
    }

    #[test]
    fn test_pending_schedule_and_claim() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.upsert_schedule(&entry("due", local(8, 0))).unwrap();
        ledger.upsert_schedule(&entry("later", local(18, 0))).unwrap();

        let due = ledger.list_pending_schedule(local(9, 0)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "due");

        assert!(ledger.claim_schedule("due").unwrap());
        assert!(!ledger.claim_schedule("due").unwrap());
        assert!(ledger.list_pending_schedule(local(9, 0)).unwrap().is_empty());

        ledger
            .finish_schedule("due", ScheduleStatus::Failed, Some("RateLimitExceeded"))
            .unwrap();
        let all = ledger.list_schedules().unwrap();
        let finished = all.iter().find(|e| e.id == "due").unwrap();
        assert_eq!(finished.status, ScheduleStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some("RateLimitExceeded"));

        assert!(ledger.delete_schedule("later").unwrap());
        assert!(!ledger.delete_schedule("later").unwrap());
    }

    #[test]
    fn test_dispatch_window_count() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let now = Utc::now();
        ledger.record_dispatch("c1", "t1", now - Duration::minutes(90)).unwrap();
        ledger.record_dispatch("c1", "t2", now - Duration::minutes(10)).unwrap();
        ledger.record_dispatch("c1", "t2", now - Duration::minutes(5)).unwrap();
        ledger.record_dispatch("c2", "t3", now).unwrap();

        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 1);
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(1440)).unwrap(), 2);

        assert!(ledger.release_dispatch("c1", "t2").unwrap());
        assert!(!ledger.release_dispatch("c1", "t2").unwrap());
        assert_eq!(ledger.count_dispatches("c1", now - Duration::minutes(60)).unwrap(), 0);
        assert_eq!(ledger.count_dispatches("c2", now - Duration::minutes(60)).unwrap(), 1);
    }

    #[test]
    fn test_variant_activation_is_exclusive() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let make = |id: &str, active: bool| ContentVariant {
            id: id.into(),
            parent_task_id: "t1".into(),
            kind: VariantKind::Title,
            content: format!("title {id}"),
            is_active: active,
            observed_performance: 0.0,
            swapped_at: None,
        };
        ledger
            .insert_variants(&[make("v1", true), make("v2", false), make("v3", false)])
            .unwrap();

        let next = ledger.next_unused_variant("t1", VariantKind::Title).unwrap().unwrap();
        assert_eq!(next.id, "v2");
        ledger.activate_variant("v2", Utc::now()).unwrap();

        let variants = ledger.list_variants("t1").unwrap();
        let active: Vec<&str> = variants
            .iter()
            .filter(|v| v.is_active)
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(active, vec!["v2"]);

        let next = ledger.next_unused_variant("t1", VariantKind::Title).unwrap().unwrap();
        assert_eq!(next.id, "v3");
        assert!(ledger.activate_variant("nope", Utc::now()).is_err());
    }

    #[test]
    fn test_metrics_and_patch_cache() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert!(ledger.latest_metric("t1").unwrap().is_none());
        let now = Utc::now();
        for (ctr, offset) in [(0.12, 20), (0.05, 5)] {
            ledger
                .record_metric(&PerformanceSample {
                    task_id: "t1".into(),
                    ctr,
                    views: 100,
                    at: now - Duration::minutes(offset),
                })
                .unwrap();
        }
        assert_eq!(ledger.latest_metric("t1").unwrap().unwrap().ctr, 0.05);

        ledger.record_patch("a1", "publish", "{}").unwrap();
        let cached = ledger.cached_patch("publish").unwrap().unwrap();
        assert_eq!(cached.asset_id, "a1");
        assert!(ledger.cached_patch("scrape").unwrap().is_none());
    }
}
