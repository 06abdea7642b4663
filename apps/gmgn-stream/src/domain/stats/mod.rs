//! Monitoring Statistics
//!
//! A single accumulator of counters updated on every processed envelope and
//! event. Callers only ever see [`StatsSnapshot`] values; mutation stays
//! inside the crate.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::channel::ChannelName;
use crate::domain::events::FeedEvent;

/// Upper bound on distinct token addresses remembered for the unique count.
pub const UNIQUE_TOKEN_CAP: usize = 1_000_000;

// =============================================================================
// Counters
// =============================================================================

/// Plain counters tracked by [`MonitoringStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCounter {
    /// Inbound frames that failed to decode.
    DecodeErrors,
    /// Inbound frames naming a channel this client does not know.
    UnknownChannelFrames,
    /// Envelopes whose payload failed validation.
    PayloadErrors,
    /// Handler invocations that failed or panicked.
    HandlerErrors,
    /// Events whose sequence token was already seen.
    Duplicates,
    /// Events dropped because the iteration buffer was full.
    ListenerDropped,
    /// Events accepted by the pipeline queue.
    Enqueued,
    /// Events dropped because the pipeline queue was full.
    Dropped,
    /// Events rejected by a filter rule.
    FilteredOut,
    /// Alerts delivered.
    AlertsFired,
    /// Alerts matched inside a cooldown and not delivered.
    AlertsSuppressed,
    /// Successful sink writes.
    Exported,
    /// Failed sink writes.
    SinkErrors,
    /// Handshake or socket failures.
    ConnectionErrors,
    /// Successful reconnects.
    Reconnects,
}

impl StatCounter {
    const COUNT: usize = 15;

    /// Every counter, in snapshot order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::DecodeErrors,
        Self::UnknownChannelFrames,
        Self::PayloadErrors,
        Self::HandlerErrors,
        Self::Duplicates,
        Self::ListenerDropped,
        Self::Enqueued,
        Self::Dropped,
        Self::FilteredOut,
        Self::AlertsFired,
        Self::AlertsSuppressed,
        Self::Exported,
        Self::SinkErrors,
        Self::ConnectionErrors,
        Self::Reconnects,
    ];

    /// Help text for the exported metric.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::DecodeErrors => "Inbound frames that failed to decode",
            Self::UnknownChannelFrames => "Inbound frames for unknown channels",
            Self::PayloadErrors => "Envelopes with invalid payloads",
            Self::HandlerErrors => "Failed or panicked handler invocations",
            Self::Duplicates => "Events carrying an already seen sequence token",
            Self::ListenerDropped => "Events dropped by full iteration buffers",
            Self::Enqueued => "Events accepted by the pipeline queue",
            Self::Dropped => "Events dropped by a full pipeline queue",
            Self::FilteredOut => "Events rejected by filter rules",
            Self::AlertsFired => "Alerts delivered",
            Self::AlertsSuppressed => "Alerts suppressed by cooldown",
            Self::Exported => "Successful sink writes",
            Self::SinkErrors => "Failed sink writes",
            Self::ConnectionErrors => "Handshake or socket failures",
            Self::Reconnects => "Successful reconnects",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    /// Prometheus metric name for this counter.
    #[must_use]
    pub const fn metric_name(self) -> &'static str {
        match self {
            Self::DecodeErrors => "gmgn_stream_decode_errors_total",
            Self::UnknownChannelFrames => "gmgn_stream_unknown_channel_frames_total",
            Self::PayloadErrors => "gmgn_stream_payload_errors_total",
            Self::HandlerErrors => "gmgn_stream_handler_errors_total",
            Self::Duplicates => "gmgn_stream_duplicates_total",
            Self::ListenerDropped => "gmgn_stream_listener_dropped_total",
            Self::Enqueued => "gmgn_stream_pipeline_enqueued_total",
            Self::Dropped => "gmgn_stream_pipeline_dropped_total",
            Self::FilteredOut => "gmgn_stream_filtered_out_total",
            Self::AlertsFired => "gmgn_stream_alerts_fired_total",
            Self::AlertsSuppressed => "gmgn_stream_alerts_suppressed_total",
            Self::Exported => "gmgn_stream_exported_total",
            Self::SinkErrors => "gmgn_stream_sink_errors_total",
            Self::ConnectionErrors => "gmgn_stream_connection_errors_total",
            Self::Reconnects => "gmgn_stream_reconnects_total",
        }
    }
}

// =============================================================================
// Accumulator
// =============================================================================

/// Mutable accumulator of feed statistics.
#[derive(Debug)]
pub struct MonitoringStats {
    started_at: DateTime<Utc>,
    started: Instant,
    messages_received: u64,
    events_by_channel: BTreeMap<ChannelName, u64>,
    unique_tokens: HashSet<String>,
    counters: [u64; StatCounter::COUNT],
}

impl Default for MonitoringStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringStats {
    /// Start a new accumulator; uptime is measured from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            messages_received: 0,
            events_by_channel: BTreeMap::new(),
            unique_tokens: HashSet::new(),
            counters: [0; StatCounter::COUNT],
        }
    }

    /// Count one inbound data envelope.
    pub const fn record_message(&mut self) {
        self.messages_received += 1;
    }

    /// Count one typed event and remember its token address.
    pub fn record_event(&mut self, event: &FeedEvent) {
        *self.events_by_channel.entry(event.channel).or_insert(0) += 1;
        if let Some(token) = event.token_address() {
            if self.unique_tokens.len() < UNIQUE_TOKEN_CAP {
                self.unique_tokens.insert(token.to_string());
            }
        }
        if event.duplicate {
            self.increment(StatCounter::Duplicates);
        }
    }

    /// Increment a plain counter.
    pub const fn increment(&mut self, counter: StatCounter) {
        self.counters[counter.index()] += 1;
    }

    /// Current value of a plain counter.
    #[must_use]
    pub const fn get(&self, counter: StatCounter) -> u64 {
        self.counters[counter.index()]
    }

    /// Read-only copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let uptime = self.started.elapsed();
        let uptime_secs = uptime.as_secs();
        #[allow(clippy::cast_precision_loss)]
        let messages_per_second = if uptime.as_secs_f64() > 0.0 {
            self.messages_received as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs,
            messages_received: self.messages_received,
            messages_per_second,
            events_by_channel: self
                .events_by_channel
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            unique_tokens: self.unique_tokens.len() as u64,
            decode_errors: self.get(StatCounter::DecodeErrors),
            unknown_channel_frames: self.get(StatCounter::UnknownChannelFrames),
            payload_errors: self.get(StatCounter::PayloadErrors),
            handler_errors: self.get(StatCounter::HandlerErrors),
            duplicates: self.get(StatCounter::Duplicates),
            listener_dropped: self.get(StatCounter::ListenerDropped),
            enqueued: self.get(StatCounter::Enqueued),
            dropped_count: self.get(StatCounter::Dropped),
            filtered_out: self.get(StatCounter::FilteredOut),
            alerts_fired: self.get(StatCounter::AlertsFired),
            alerts_suppressed: self.get(StatCounter::AlertsSuppressed),
            exported: self.get(StatCounter::Exported),
            sink_errors: self.get(StatCounter::SinkErrors),
            connection_errors: self.get(StatCounter::ConnectionErrors),
            reconnects: self.get(StatCounter::Reconnects),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of [`MonitoringStats`], safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Data envelopes received.
    pub messages_received: u64,
    /// Average envelopes per second since start.
    pub messages_per_second: f64,
    /// Typed events per channel.
    pub events_by_channel: BTreeMap<String, u64>,
    /// Distinct token addresses seen.
    pub unique_tokens: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Frames on unknown channels.
    pub unknown_channel_frames: u64,
    /// Payloads that failed validation.
    pub payload_errors: u64,
    /// Failed handler invocations.
    pub handler_errors: u64,
    /// Events marked as duplicates.
    pub duplicates: u64,
    /// Events dropped by a full iteration buffer.
    pub listener_dropped: u64,
    /// Events accepted by the pipeline.
    pub enqueued: u64,
    /// Events dropped by a full pipeline queue.
    pub dropped_count: u64,
    /// Events rejected by filters.
    pub filtered_out: u64,
    /// Alerts delivered.
    pub alerts_fired: u64,
    /// Alerts suppressed by cooldown.
    pub alerts_suppressed: u64,
    /// Successful sink writes.
    pub exported: u64,
    /// Failed sink writes.
    pub sink_errors: u64,
    /// Connection failures.
    pub connection_errors: u64,
    /// Successful reconnects.
    pub reconnects: u64,
}

// =============================================================================
// Shared Handle
// =============================================================================

/// Cloneable handle to one [`MonitoringStats`].
///
/// Anything outside the crate can only take snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<Mutex<MonitoringStats>>,
}

impl StatsHandle {
    /// Create a handle around a fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }

    pub(crate) fn increment(&self, counter: StatCounter) {
        self.inner.lock().increment(counter);
        metrics::counter!(counter.metric_name()).increment(1);
    }

    pub(crate) fn record_message(&self, channel: ChannelName) {
        self.inner.lock().record_message();
        metrics::counter!(crate::infrastructure::metrics::MESSAGES_TOTAL, "channel" => channel.as_str()).increment(1);
    }

    pub(crate) fn record_event(&self, event: &FeedEvent) {
        self.inner.lock().record_event(event);
        if event.duplicate {
            metrics::counter!(StatCounter::Duplicates.metric_name()).increment(1);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::events::{EventPayload, SocialInfo};

    fn social(token: &str, duplicate: bool) -> FeedEvent {
        FeedEvent {
            channel: ChannelName::SocialInfo,
            sequence: None,
            received_at: Utc::now(),
            duplicate,
            payload: EventPayload::SocialInfo(SocialInfo {
                token_address: token.to_string(),
                website: None,
                twitter: None,
                telegram: None,
                discord: None,
                github: None,
                description: None,
                chain: None,
                updated_at: None,
            }),
        }
    }

    #[test]
    fn new_stats_are_zero() {
        let snapshot = MonitoringStats::new().snapshot();
        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.dropped_count, 0);
        assert!(snapshot.events_by_channel.is_empty());
    }

    #[test]
    fn events_count_per_channel_and_unique_tokens() {
        let mut stats = MonitoringStats::new();
        stats.record_event(&social("a", false));
        stats.record_event(&social("a", true));
        stats.record_event(&social("b", false));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_by_channel.get("social-info"), Some(&3));
        assert_eq!(snapshot.unique_tokens, 2);
        assert_eq!(snapshot.duplicates, 1);
    }

    #[test]
    fn counters_are_independent() {
        let mut stats = MonitoringStats::new();
        stats.increment(StatCounter::Dropped);
        stats.increment(StatCounter::Dropped);
        stats.increment(StatCounter::SinkErrors);

        assert_eq!(stats.get(StatCounter::Dropped), 2);
        assert_eq!(stats.get(StatCounter::SinkErrors), 1);
        assert_eq!(stats.get(StatCounter::AlertsFired), 0);
    }

    #[test]
    fn handle_snapshots_share_state() {
        let handle = StatsHandle::new();
        let clone = handle.clone();
        clone.increment(StatCounter::HandlerErrors);
        clone.record_message(ChannelName::PoolCreation);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.handler_errors, 1);
        assert_eq!(snapshot.messages_received, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(MonitoringStats::new().snapshot()).unwrap();
        assert!(json.get("dropped_count").is_some());
        assert!(json.get("uptime_secs").is_some());
    }
}
