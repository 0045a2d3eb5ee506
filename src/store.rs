//! Durable alert persistence with bounded retry and graceful degradation.
//!
//! SQLite access is serialized behind a mutex; each write attempt runs in its
//! own transaction so a failed attempt rolls back before the retry. Only
//! transient connectivity-class failures (busy/locked) are retried; anything
//! else degrades immediately. Exhausted writes are dropped and logged, reads
//! degrade to empty results. The scan loop never sees a store error.

use std::collections::HashMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, warn};

use crate::types::{Alert, AlertLevel};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id          INTEGER PRIMARY KEY,
    level       TEXT NOT NULL,
    title       TEXT NOT NULL,
    message     TEXT NOT NULL,
    port        INTEGER,
    created_at  INTEGER NOT NULL,
    resolved    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
CREATE INDEX IF NOT EXISTS idx_alerts_resolved ON alerts(resolved);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient database failure: {0}")]
    Transient(rusqlite::Error),
    #[error("database failure: {0}")]
    Database(rusqlite::Error),
}

impl StoreError {
    fn from_sqlite(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                StoreError::Transient(err)
            }
            _ => StoreError::Database(err),
        }
    }
}

/// An alert about to be persisted; the store assigns id and creation time.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub port: Option<u16>,
}

/// Aggregate alert counts over a trailing window.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub total: i64,
    pub resolved: i64,
    pub unresolved: i64,
    pub by_level: HashMap<String, i64>,
}

pub struct AlertStore {
    conn: Mutex<Connection>,
    max_retries: u32,
    retry_delay: Duration,
}

impl AlertStore {
    pub fn open(path: impl AsRef<Path>, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database: {}", path.as_ref().display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("setting journal_mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting synchronous")?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        Ok(Self::with_connection(conn, max_retries, retry_delay))
    }

    /// In-memory store, used by tests and `--once` runs without a db path.
    pub fn open_in_memory(max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        Ok(Self::with_connection(conn, max_retries, retry_delay))
    }

    fn with_connection(conn: Connection, max_retries: u32, retry_delay: Duration) -> Self {
        AlertStore {
            conn: Mutex::new(conn),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Persist one alert. Returns `None` when the write was dropped after
    /// retry exhaustion or a non-transient failure.
    pub fn persist(&self, alert: NewAlert) -> Option<Alert> {
        let created_at = OffsetDateTime::now_utc().unix_timestamp();
        self.with_retry("persist alert", |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO alerts(level, title, message, port, created_at, resolved)
                 VALUES (?, ?, ?, ?, ?, 0)",
                params![
                    alert.level.as_str(),
                    alert.title,
                    alert.message,
                    alert.port,
                    created_at
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(Alert {
                id,
                level: alert.level,
                title: alert.title.clone(),
                message: alert.message.clone(),
                port: alert.port,
                created_at,
                resolved: false,
            })
        })
    }

    /// Alerts filtered by resolved flag, newest first. Degrades to empty.
    pub fn query(&self, resolved: bool, limit: Option<u32>) -> Vec<Alert> {
        self.with_retry("query alerts", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, level, title, message, port, created_at, resolved
                 FROM alerts WHERE resolved = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )?;
            // SQLite treats a negative LIMIT as unbounded.
            let limit = limit.map(i64::from).unwrap_or(-1);
            let rows = stmt.query_map(params![resolved, limit], row_to_alert)?;
            rows.collect::<rusqlite::Result<Vec<Alert>>>()
        })
        .unwrap_or_default()
    }

    /// Mark an alert resolved. Returns true if the alert exists; resolving an
    /// already-resolved alert performs no write but still returns true.
    pub fn resolve(&self, id: i64) -> bool {
        self.with_retry("resolve alert", |conn| {
            let tx = conn.unchecked_transaction()?;
            let updated = tx.execute(
                "UPDATE alerts SET resolved = 1 WHERE id = ? AND resolved = 0",
                params![id],
            )?;
            let known = if updated > 0 {
                true
            } else {
                let n: i64 = tx.query_row(
                    "SELECT COUNT(1) FROM alerts WHERE id = ?",
                    params![id],
                    |r| r.get(0),
                )?;
                n > 0
            };
            tx.commit()?;
            Ok(known)
        })
        .unwrap_or(false)
    }

    /// Counts over alerts created within the trailing window. Degrades to
    /// zeroed stats.
    pub fn stats(&self, window: Duration) -> AlertStats {
        let since = OffsetDateTime::now_utc().unix_timestamp() - window.as_secs() as i64;
        self.with_retry("alert stats", |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(1) FROM alerts WHERE created_at >= ?",
                params![since],
                |r| r.get(0),
            )?;
            let resolved: i64 = conn.query_row(
                "SELECT COUNT(1) FROM alerts WHERE created_at >= ? AND resolved = 1",
                params![since],
                |r| r.get(0),
            )?;
            let mut by_level = HashMap::new();
            let mut stmt = conn.prepare(
                "SELECT level, COUNT(1) FROM alerts WHERE created_at >= ? GROUP BY level",
            )?;
            let rows = stmt.query_map(params![since], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (level, count) = row?;
                by_level.insert(level, count);
            }
            Ok(AlertStats {
                total,
                resolved,
                unresolved: total - resolved,
                by_level,
            })
        })
        .unwrap_or_default()
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Option<T> {
        // The lock is scoped to each attempt, not the whole retry budget, so
        // other callers are not stalled behind a retrying write's sleeps.
        retry_transient(self.max_retries, self.retry_delay, what, || {
            let conn = self.conn.lock();
            op(&conn).map_err(StoreError::from_sqlite)
        })
    }
}

/// Run `op` up to `max_retries` times, sleeping `delay` between transient
/// failures. Non-transient failures and exhaustion degrade to `None`.
pub fn retry_transient<T>(
    max_retries: u32,
    delay: Duration,
    what: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Option<T> {
    for attempt in 1..=max_retries {
        match op() {
            Ok(value) => return Some(value),
            Err(StoreError::Transient(e)) if attempt < max_retries => {
                warn!(
                    error = %e,
                    attempt,
                    max_retries,
                    op = what,
                    "transient database failure, retrying"
                );
                thread::sleep(delay);
            }
            Err(e) => {
                error!(error = %e, op = what, "database operation failed, degrading");
                return None;
            }
        }
    }
    None
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        level: AlertLevel::parse(&row.get::<_, String>(1)?),
        title: row.get(2)?,
        message: row.get(3)?,
        port: row.get(4)?,
        created_at: row.get(5)?,
        resolved: row.get(6)?,
    })
}
