//! Tabular CSV export.
//!
//! Every file starts with a header row; market fields that an event does
//! not carry are left empty. The full typed record is kept as JSON in the
//! last column.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::application::ports::{ExportSink, SinkError};
use crate::domain::events::FeedEvent;
use crate::infrastructure::pipeline::sinks::rotating::{RotatingFile, RotationPolicy};

/// Column order of every CSV file.
pub const CSV_COLUMNS: &[&str] = &[
    "received_at",
    "channel",
    "sequence",
    "duplicate",
    "token_address",
    "symbol",
    "market_cap_usd",
    "liquidity_usd",
    "volume_24h_usd",
    "holder_count",
    "exchange",
    "payload",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    received_at: String,
    channel: &'static str,
    sequence: Option<&'a str>,
    duplicate: bool,
    token_address: Option<&'a str>,
    symbol: Option<&'a str>,
    market_cap_usd: Option<String>,
    liquidity_usd: Option<String>,
    volume_24h_usd: Option<String>,
    holder_count: Option<u64>,
    exchange: Option<&'a str>,
    payload: String,
}

/// Header row plus one row per event.
#[derive(Debug)]
pub struct CsvSink {
    file: RotatingFile,
}

impl CsvSink {
    /// Create a sink writing `events_*.csv` files into `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory cannot be created.
    pub fn new(directory: impl AsRef<Path>, policy: RotationPolicy) -> Result<Self, SinkError> {
        Ok(Self {
            file: RotatingFile::new(directory, "events", "csv", policy)?,
        })
    }

    /// Underlying rotating file.
    #[must_use]
    pub const fn file(&self) -> &RotatingFile {
        &self.file
    }
}

fn encode_header() -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(CSV_COLUMNS)
        .map_err(|e| SinkError::Csv(e.to_string()))?;
    writer.into_inner().map_err(|e| SinkError::Csv(e.to_string()))
}

fn encode_row(event: &FeedEvent) -> Result<Vec<u8>, SinkError> {
    let payload = &event.payload;
    let row = CsvRow {
        received_at: event.received_at.to_rfc3339(),
        channel: event.channel.as_str(),
        sequence: event.sequence.as_deref(),
        duplicate: event.duplicate,
        token_address: payload.token_address(),
        symbol: payload.symbol(),
        market_cap_usd: payload.market_cap_usd().map(|d| d.to_string()),
        liquidity_usd: payload.liquidity_usd().map(|d| d.to_string()),
        volume_24h_usd: payload.volume_24h_usd().map(|d| d.to_string()),
        holder_count: payload.holder_count(),
        exchange: payload.exchange(),
        payload: serde_json::to_string(payload)?,
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .serialize(row)
        .map_err(|e| SinkError::Csv(e.to_string()))?;
    writer.into_inner().map_err(|e| SinkError::Csv(e.to_string()))
}

#[async_trait]
impl ExportSink for CsvSink {
    async fn write(&mut self, event: &FeedEvent) -> Result<(), SinkError> {
        let row = encode_row(event)?;

        self.file.rotate_if_needed()?;
        if self.file.is_fresh() {
            self.file.append(&encode_header()?)?;
        }
        self.file.append(&row)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::domain::channel::ChannelName;
    use crate::domain::events::EventPayload;

    fn pool(symbol: &str) -> FeedEvent {
        let payload = json!({
            "pa": "P1",
            "ex": "raydium",
            "bti": {"a": "T1", "s": symbol, "mc": "60000.5", "hc": 10}
        });
        FeedEvent {
            channel: ChannelName::PoolCreation,
            sequence: None,
            received_at: Utc::now(),
            duplicate: false,
            payload: EventPayload::parse(ChannelName::PoolCreation, &payload)
                .unwrap()
                .remove(0),
        }
    }

    #[tokio::test]
    async fn header_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RotationPolicy {
            max_bytes: 1024 * 1024,
            max_age: Duration::from_secs(3600),
            compress: false,
        };
        let mut sink = CsvSink::new(dir.path(), policy).unwrap();

        sink.write(&pool("AAA")).await.unwrap();
        sink.write(&pool("BBB")).await.unwrap();
        sink.flush().await.unwrap();

        let mut reader = csv::Reader::from_path(sink.file().current_path().unwrap()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_COLUMNS);

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "pool-creation");
        assert_eq!(&rows[0][4], "T1");
        assert_eq!(&rows[1][5], "BBB");
        assert_eq!(&rows[0][6], "60000.5");
        assert_eq!(&rows[0][8], "");
        assert_eq!(&rows[0][9], "10");
    }

    #[tokio::test]
    async fn rotated_file_gets_its_own_header() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RotationPolicy {
            max_bytes: 1,
            max_age: Duration::from_secs(3600),
            compress: false,
        };
        let mut sink = CsvSink::new(dir.path(), policy).unwrap();

        sink.write(&pool("AAA")).await.unwrap();
        sink.write(&pool("BBB")).await.unwrap();
        sink.flush().await.unwrap();

        let rotated = sink.file().last_rotated().unwrap();
        let text = std::fs::read_to_string(rotated).unwrap();
        assert!(text.starts_with("received_at,channel"));
        let current = std::fs::read_to_string(sink.file().current_path().unwrap()).unwrap();
        assert!(current.starts_with("received_at,channel"));
    }
}
