//! Prometheus Metrics Module
//!
//! Exposes feed metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Envelopes received per channel
//! - **Counters**: One per [`StatCounter`], mirroring the stats snapshot
//! - **Connection**: Current connection state
//! - **Pipeline**: Queue depth and per-event processing latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::stats::StatCounter;

/// Envelopes received, labelled by `channel`.
pub const MESSAGES_TOTAL: &str = "gmgn_stream_messages_total";

/// Connection state gauge (0 disconnected .. 4 closed).
pub const CONNECTION_STATE: &str = "gmgn_stream_connection_state";

/// Events waiting in the pipeline queue.
pub const PIPELINE_QUEUE_DEPTH: &str = "gmgn_stream_pipeline_queue_depth";

/// Filter, alert and export time per event.
pub const PIPELINE_PROCESS_SECONDS: &str = "gmgn_stream_pipeline_process_seconds";

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and return its handle.
///
/// Later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns [`BuildError`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(MESSAGES_TOTAL, "Envelopes received from the GMGN feed");

    for counter in StatCounter::ALL {
        describe_counter!(counter.metric_name(), counter.description());
    }

    describe_gauge!(
        CONNECTION_STATE,
        "Feed connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 closed)"
    );
    describe_gauge!(PIPELINE_QUEUE_DEPTH, "Events waiting in the pipeline queue");
    describe_histogram!(
        PIPELINE_PROCESS_SECONDS,
        "Time to filter, alert on and export one event"
    );
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn metric_names_are_prefixed_and_unique() {
        let names: HashSet<_> = StatCounter::ALL
            .iter()
            .map(|c| c.metric_name())
            .chain([
                MESSAGES_TOTAL,
                CONNECTION_STATE,
                PIPELINE_QUEUE_DEPTH,
                PIPELINE_PROCESS_SECONDS,
            ])
            .collect();

        assert_eq!(names.len(), StatCounter::ALL.len() + 4);
        assert!(names.iter().all(|n| n.starts_with("gmgn_stream_")));
    }

    #[test]
    fn every_counter_is_described() {
        assert!(StatCounter::ALL.iter().all(|c| !c.description().is_empty()));
    }
}
