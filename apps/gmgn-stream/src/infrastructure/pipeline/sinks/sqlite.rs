//! Local `SQLite` store.
//!
//! Events land in an `events` table of `gmgn_data.db`. Writes are buffered
//! and committed in batches inside one transaction.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::{Connection, params};

use crate::application::ports::{ExportSink, SinkError};
use crate::domain::events::FeedEvent;

/// Database file name inside the export directory.
pub const DATABASE_FILE: &str = "gmgn_data.db";

/// Rows buffered before a commit.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Maximum time rows stay buffered.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

struct PendingRow {
    channel: &'static str,
    sequence: Option<String>,
    token_address: Option<String>,
    received_at: String,
    duplicate: bool,
    payload: String,
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Batched writer into a local `SQLite` database.
pub struct SqliteSink {
    conn: Connection,
    batch: Vec<PendingRow>,
    batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl std::fmt::Debug for SqliteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSink")
            .field("pending", &self.batch.len())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl SqliteSink {
    /// Open (or create) `gmgn_data.db` inside `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the directory or schema cannot be created.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, SinkError> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        let conn = Connection::open(directory.join(DATABASE_FILE))?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                sequence TEXT,
                token_address TEXT,
                received_at TEXT NOT NULL,
                duplicate INTEGER NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_channel ON events(channel, received_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_token ON events(token_address)",
            [],
        )?;

        tracing::info!(path = %directory.join(DATABASE_FILE).display(), "SQLite export store ready");

        Ok(Self {
            conn,
            batch: Vec::with_capacity(DEFAULT_BATCH_SIZE),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            last_flush: Instant::now(),
        })
    }

    /// Override the batch size (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Rows buffered but not yet committed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Rows committed per channel.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Store`] if the query fails.
    pub fn count_by_channel(&self, channel: &str) -> Result<u64, SinkError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE channel = ?1",
            params![channel],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn flush_batch(&mut self) -> Result<(), SinkError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        // A failed commit loses the batch rather than retrying it forever.
        let rows = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.last_flush = Instant::now();
        if let Err(e) = self.insert_rows(&rows) {
            tracing::warn!(rows = rows.len(), error = %e, "SQLite batch discarded");
            return Err(e);
        }

        tracing::debug!(rows = rows.len(), "Flushed events to SQLite");
        Ok(())
    }

    fn insert_rows(&mut self, rows: &[PendingRow]) -> Result<(), SinkError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events
                 (channel, sequence, token_address, received_at, duplicate, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.channel,
                    row.sequence,
                    row.token_address,
                    row.received_at,
                    row.duplicate,
                    row.payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl ExportSink for SqliteSink {
    async fn write(&mut self, event: &FeedEvent) -> Result<(), SinkError> {
        self.batch.push(PendingRow {
            channel: event.channel.as_str(),
            sequence: event.sequence.clone(),
            token_address: event.token_address().map(str::to_string),
            received_at: event.received_at.to_rfc3339(),
            duplicate: event.duplicate,
            payload: serde_json::to_string(&event.payload)?,
        });

        if self.batch.len() >= self.batch_size || self.last_flush.elapsed() >= self.flush_interval
        {
            self.flush_batch()?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.flush_batch()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::channel::ChannelName;
    use crate::domain::events::EventPayload;

    fn social(token: &str) -> FeedEvent {
        FeedEvent {
            channel: ChannelName::SocialInfo,
            sequence: Some("1".to_string()),
            received_at: Utc::now(),
            duplicate: false,
            payload: EventPayload::parse(ChannelName::SocialInfo, &json!({"a": token}))
                .unwrap()
                .remove(0),
        }
    }

    #[tokio::test]
    async fn batches_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path()).unwrap().with_batch_size(10);

        sink.write(&social("T1")).await.unwrap();
        sink.write(&social("T2")).await.unwrap();
        assert_eq!(sink.pending(), 2);
        assert_eq!(sink.count_by_channel("social-info").unwrap(), 0);

        sink.flush().await.unwrap();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.count_by_channel("social-info").unwrap(), 2);
    }

    #[tokio::test]
    async fn full_batch_commits() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path()).unwrap().with_batch_size(2);

        for token in ["T1", "T2", "T3"] {
            sink.write(&social(token)).await.unwrap();
        }

        assert_eq!(sink.count_by_channel("social-info").unwrap(), 2);
        assert_eq!(sink.pending(), 1);
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn reopening_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = SqliteSink::open(dir.path()).unwrap();
            sink.write(&social("T1")).await.unwrap();
            sink.flush().await.unwrap();
        }
        let sink = SqliteSink::open(dir.path()).unwrap();
        assert_eq!(sink.count_by_channel("social-info").unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_commit_discards_batch_instead_of_growing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path()).unwrap().with_batch_size(2);
        sink.conn.execute("DROP TABLE events", []).unwrap();

        sink.write(&social("T1")).await.unwrap();
        for token in ["T2", "T3", "T4", "T5", "T6"] {
            let _ = sink.write(&social(token)).await;
            assert!(sink.pending() <= 2, "pending grew to {}", sink.pending());
        }

        sink.write(&social("T7")).await.unwrap();
        assert!(matches!(
            sink.write(&social("T8")).await,
            Err(SinkError::Store(_))
        ));
        assert_eq!(sink.pending(), 0);
    }
}
