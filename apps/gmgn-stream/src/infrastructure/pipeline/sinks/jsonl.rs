//! Line-delimited JSON export.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::{ExportSink, SinkError};
use crate::domain::channel::ChannelName;
use crate::domain::events::{EventPayload, FeedEvent};
use crate::infrastructure::pipeline::sinks::rotating::{RotatingFile, RotationPolicy};

#[derive(Serialize)]
struct JsonlRecord<'a> {
    exported_at: DateTime<Utc>,
    channel: ChannelName,
    sequence: Option<&'a str>,
    received_at: DateTime<Utc>,
    duplicate: bool,
    event: &'a EventPayload,
}

/// One JSON record per line.
#[derive(Debug)]
pub struct JsonlSink {
    file: RotatingFile,
    include_metadata: bool,
}

impl JsonlSink {
    /// Create a sink writing `events_*.jsonl` files into `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory cannot be created.
    pub fn new(
        directory: impl AsRef<Path>,
        policy: RotationPolicy,
        include_metadata: bool,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            file: RotatingFile::new(directory, "events", "jsonl", policy)?,
            include_metadata,
        })
    }

    /// Underlying rotating file.
    #[must_use]
    pub const fn file(&self) -> &RotatingFile {
        &self.file
    }
}

#[async_trait]
impl ExportSink for JsonlSink {
    async fn write(&mut self, event: &FeedEvent) -> Result<(), SinkError> {
        let mut line = if self.include_metadata {
            serde_json::to_vec(&JsonlRecord {
                exported_at: Utc::now(),
                channel: event.channel,
                sequence: event.sequence.as_deref(),
                received_at: event.received_at,
                duplicate: event.duplicate,
                event: &event.payload,
            })?
        } else {
            serde_json::to_vec(&event.payload)?
        };
        line.push(b'\n');

        self.file.rotate_if_needed()?;
        self.file.append(&line)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
