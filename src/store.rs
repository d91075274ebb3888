//! Durable event log backed by SQLite.
//!
//! Two tables: `events` holds every event that crossed the bus with a
//! lossless JSON payload for round-trip reads, `state` is a small key/value
//! table for miscellaneous flags. Opened with WAL journaling and a busy
//! timeout so readers tolerate the single writer.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::event::Event;

pub const DEFAULT_DB_PATH: &str = "/var/lib/hostguard/events.db";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database. Migration is idempotent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening database at {}", path.as_ref().display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                severity INTEGER NOT NULL,
                hostname TEXT NOT NULL,
                timestamp DATETIME NOT NULL,
                message TEXT NOT NULL,
                details TEXT,
                suggested TEXT,
                source TEXT,
                payload TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
            CREATE INDEX IF NOT EXISTS idx_events_severity ON events(severity);

            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .context("migrating database")?;

        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// Persist an event. Upserts by id, so replays are safe.
    pub fn save(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO events
             (id, type, severity, hostname, timestamp, message, details, suggested, source, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id,
                event.kind.as_str(),
                event.severity as i64,
                event.hostname,
                event.timestamp,
                event.message,
                event.details,
                event.suggested,
                event.source,
                payload,
            ],
        )?;
        Ok(())
    }

    /// Events from the last `hours` hours, newest first, capped at 100.
    pub fn recent(&self, hours: i64) -> Result<Vec<Event>> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM events
             WHERE timestamp > ?1
             ORDER BY timestamp DESC
             LIMIT 100",
        )?;
        let rows = stmt.query_map(params![since], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row?;
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(err) => debug!("skipping unreadable event payload: {}", err),
            }
        }
        Ok(events)
    }

    /// Number of events stored in the last `hours` hours.
    pub fn count(&self, hours: i64) -> Result<i64> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE timestamp > ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Human description of how long ago the last Warning-or-worse event
    /// was stored, or "never".
    pub fn last_alert_time(&self) -> String {
        let conn = self.conn.lock().unwrap();
        let ts: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT timestamp FROM events
                 WHERE severity > 0
                 ORDER BY timestamp DESC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or(None);

        let Some(ts) = ts else {
            return "never".to_string();
        };

        let elapsed = Utc::now() - ts;
        if elapsed < chrono::Duration::hours(1) {
            format!("{} minutes ago", elapsed.num_minutes())
        } else if elapsed < chrono::Duration::hours(24) {
            format!("{} hours ago", elapsed.num_hours())
        } else {
            format!("{} days ago", elapsed.num_days())
        }
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Delete events older than `days` days. Returns the number removed.
    pub fn prune(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?;
        Ok(deleted)
    }
}
