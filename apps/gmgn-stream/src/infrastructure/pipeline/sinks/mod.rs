//! Export Sinks
//!
//! File and store adapters for the [`ExportSink`] port. Each sink is
//! independently configured and independently failable.

pub mod csv;
pub mod jsonl;
pub mod rotating;
pub mod sqlite;

pub use self::csv::{CSV_COLUMNS, CsvSink};
pub use self::jsonl::JsonlSink;
pub use self::rotating::{RotatingFile, RotationPolicy};
pub use self::sqlite::{DATABASE_FILE, SqliteSink};

use crate::application::ports::{ExportSink, SinkError};
use crate::infrastructure::config::{ExportFormat, ExportSettings};

/// Build the sink described by `settings`, `None` when export is disabled.
///
/// # Errors
///
/// Returns [`SinkError`] if the output directory or store cannot be opened.
pub fn build_sink(settings: &ExportSettings) -> Result<Option<Box<dyn ExportSink>>, SinkError> {
    let Some(format) = settings.format else {
        return Ok(None);
    };
    let policy = RotationPolicy {
        max_bytes: settings.max_file_bytes,
        max_age: settings.max_file_age,
        compress: settings.compress,
    };
    let sink: Box<dyn ExportSink> = match format {
        ExportFormat::Jsonl => Box::new(JsonlSink::new(
            &settings.directory,
            policy,
            settings.include_metadata,
        )?),
        ExportFormat::Csv => Box::new(CsvSink::new(&settings.directory, policy)?),
        ExportFormat::Sqlite => Box::new(SqliteSink::open(&settings.directory)?),
    };
    tracing::info!(
        format = format.as_str(),
        directory = %settings.directory.display(),
        "Export sink configured"
    );
    Ok(Some(sink))
}

/// Sinks owned by the pipeline worker and handed back on shutdown.
#[derive(Default)]
pub struct ExportSinks {
    sinks: Vec<Box<dyn ExportSink>>,
}

impl std::fmt::Debug for ExportSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sinks.iter().map(|s| s.name()))
            .finish()
    }
}

impl ExportSinks {
    /// Wrap `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn ExportSink>>) -> Self {
        Self { sinks }
    }

    /// Add a sink.
    pub fn push(&mut self, sink: Box<dyn ExportSink>) {
        self.sinks.push(sink);
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Mutable access for the worker.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn ExportSink>> {
        self.sinks.iter_mut()
    }

    /// Flush every sink; a failing sink does not stop the others.
    ///
    /// Returns the number of sinks that failed to flush.
    pub async fn flush_all(&mut self) -> usize {
        let mut failures = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush().await {
                failures += 1;
                tracing::warn!(sink = sink.name(), error = %e, "Sink flush failed");
            }
        }
        failures
    }
}
