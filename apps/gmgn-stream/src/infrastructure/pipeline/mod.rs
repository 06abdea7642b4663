//! Filter/Alert/Export Pipeline
//!
//! A bounded queue between dispatch and a single consumer task. Per event
//! the consumer:
//!
//! 1. applies the [`FilterSet`]; a rejected event goes no further
//! 2. evaluates [`AlertCondition`]s with per-condition cooldowns
//! 3. writes the event to every [`ExportSink`], best-effort per sink
//!
//! Enqueueing never blocks: a full queue drops the event and counts it, so
//! a slow sink can never stall the socket reader.
//!
//! # Example
//!
//! ```rust,no_run
//! use gmgn_stream::infrastructure::pipeline::{Pipeline, PipelineRules};
//! use gmgn_stream::domain::stats::StatsHandle;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let (handle, worker) = Pipeline::channel(10_000, PipelineRules::default(), StatsHandle::new());
//! let task = worker.spawn(CancellationToken::new());
//!
//! // ... register `handle` with the dispatch router ...
//!
//! let mut sinks = task.shutdown().await;
//! sinks.flush_all().await;
//! # }
//! ```

pub mod alert;
pub mod filter;
pub mod sinks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use alert::{
    AlertCondition, AlertDecision, AlertEngine, AlertTrigger, ChannelNotifier, TracingNotifier,
};
pub use filter::{FilterRule, FilterSet, risk_score};
pub use sinks::{ExportSinks, build_sink};

use crate::application::ports::{AlertNotifier, EventHandler, ExportSink, HandlerError};
use crate::domain::alert::AlertSeverity;
use crate::domain::events::FeedEvent;
use crate::domain::stats::{StatCounter, StatsHandle};
use crate::infrastructure::config::FilterSettings;
use crate::infrastructure::metrics::{PIPELINE_PROCESS_SECONDS, PIPELINE_QUEUE_DEPTH};

/// Risk score above which the default alert fires.
pub const HIGH_RISK_THRESHOLD: f64 = 0.6;

// =============================================================================
// Rules
// =============================================================================

/// Immutable bundle of filters and alert conditions.
///
/// Replaced as a whole through [`PipelineHandle::replace_rules`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineRules {
    /// Filters gating alerts and export.
    pub filters: FilterSet,
    /// Alert conditions.
    pub alerts: Vec<AlertCondition>,
}

impl PipelineRules {
    /// Bundle `filters` and `alerts`.
    #[must_use]
    pub const fn new(filters: FilterSet, alerts: Vec<AlertCondition>) -> Self {
        Self { filters, alerts }
    }

    /// Rules from environment thresholds plus a high-risk alert.
    #[must_use]
    pub fn from_settings(settings: &FilterSettings) -> Self {
        let filters = FilterSet::new(FilterRule::from_settings(settings).into_iter().collect());
        let alerts = vec![
            AlertCondition::new(
                "high-risk-token",
                AlertTrigger::RiskScoreAbove(HIGH_RISK_THRESHOLD),
                settings.alert_cooldown,
            )
            .on_channels(filter::token_metric_channels())
            .with_severity(AlertSeverity::Warning),
        ];
        Self::new(filters, alerts)
    }
}

// =============================================================================
// Producer Side
// =============================================================================

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued for processing.
    Accepted,
    /// Queue full; event dropped and counted.
    Dropped,
    /// Consumer gone; event discarded.
    Closed,
}

/// Cloneable producer handle; also an [`EventHandler`].
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<FeedEvent>,
    rules: Arc<RwLock<Arc<PipelineRules>>>,
    stats: StatsHandle,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("queue_depth", &self.queue_depth())
            .field("capacity", &self.tx.max_capacity())
            .finish_non_exhaustive()
    }
}

impl PipelineHandle {
    /// Queue `event` without waiting.
    pub fn enqueue(&self, event: FeedEvent) -> EnqueueOutcome {
        let outcome = match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.increment(StatCounter::Enqueued);
                EnqueueOutcome::Accepted
            }
            Err(TrySendError::Full(dropped)) => {
                self.stats.increment(StatCounter::Dropped);
                tracing::debug!(channel = %dropped.channel, "Pipeline queue full, event dropped");
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        };
        metrics::gauge!(PIPELINE_QUEUE_DEPTH).set(self.queue_depth() as f64);
        outcome
    }

    /// Swap the whole rule bundle; cooldown history is kept.
    pub fn replace_rules(&self, rules: PipelineRules) {
        *self.rules.write() = Arc::new(rules);
        tracing::info!("Pipeline rules replaced");
    }

    /// Current rule bundle.
    #[must_use]
    pub fn rules(&self) -> Arc<PipelineRules> {
        Arc::clone(&self.rules.read())
    }

    /// Events waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the consumer has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventHandler for PipelineHandle {
    fn handle(&self, event: &FeedEvent) -> Result<(), HandlerError> {
        match self.enqueue(event.clone()) {
            EnqueueOutcome::Accepted | EnqueueOutcome::Dropped => Ok(()),
            EnqueueOutcome::Closed => Err(HandlerError::new("pipeline consumer stopped")),
        }
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}

// =============================================================================
// Consumer Side
// =============================================================================

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Rejected by a filter.
    Filtered,
    /// Passed the filters.
    Processed {
        /// Alerts delivered.
        alerts_fired: usize,
        /// Alerts suppressed by cooldown.
        alerts_suppressed: usize,
        /// Sinks written successfully.
        exported: usize,
        /// Sinks that failed.
        sink_errors: usize,
    },
}

/// Pipeline constructor.
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    /// Create the producer handle and the consumer with a queue of
    /// `capacity` events.
    #[must_use]
    pub fn channel(
        capacity: usize,
        rules: PipelineRules,
        stats: StatsHandle,
    ) -> (PipelineHandle, PipelineWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rules = Arc::new(RwLock::new(Arc::new(rules)));
        let handle = PipelineHandle {
            tx,
            rules: Arc::clone(&rules),
            stats: stats.clone(),
        };
        let worker = PipelineWorker {
            rx,
            rules,
            engine: AlertEngine::new(),
            notifiers: Vec::new(),
            sinks: ExportSinks::default(),
            stats,
        };
        (handle, worker)
    }
}

/// Single consumer of the pipeline queue.
pub struct PipelineWorker {
    rx: mpsc::Receiver<FeedEvent>,
    rules: Arc<RwLock<Arc<PipelineRules>>>,
    engine: AlertEngine,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
    sinks: ExportSinks,
    stats: StatsHandle,
}

impl std::fmt::Debug for PipelineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineWorker")
            .field("notifiers", &self.notifiers.len())
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}

impl PipelineWorker {
    /// Deliver fired alerts to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Write surviving events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ExportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run one event through filter, alert and export.
    pub async fn process(&mut self, event: &FeedEvent) -> ProcessOutcome {
        let started = Instant::now();
        let rules = Arc::clone(&self.rules.read());

        if !rules.filters.matches(event) {
            self.stats.increment(StatCounter::FilteredOut);
            return ProcessOutcome::Filtered;
        }

        let mut alerts_fired = 0;
        let mut alerts_suppressed = 0;
        for decision in self.engine.evaluate(&rules.alerts, event) {
            match decision {
                AlertDecision::Fired(alert) => {
                    alerts_fired += 1;
                    self.stats.increment(StatCounter::AlertsFired);
                    for notifier in &self.notifiers {
                        notifier.notify(&alert);
                    }
                }
                AlertDecision::Suppressed(condition) => {
                    alerts_suppressed += 1;
                    self.stats.increment(StatCounter::AlertsSuppressed);
                    tracing::trace!(condition = %condition, "Alert suppressed by cooldown");
                }
            }
        }

        let mut exported = 0;
        let mut sink_errors = 0;
        for sink in self.sinks.iter_mut() {
            match sink.write(event).await {
                Ok(()) => {
                    exported += 1;
                    self.stats.increment(StatCounter::Exported);
                }
                Err(e) => {
                    sink_errors += 1;
                    self.stats.increment(StatCounter::SinkErrors);
                    tracing::warn!(
                        sink = sink.name(),
                        channel = %event.channel,
                        error = %e,
                        "Sink write failed"
                    );
                }
            }
        }

        metrics::histogram!(PIPELINE_PROCESS_SECONDS)
            .record(started.elapsed().as_secs_f64());

        ProcessOutcome::Processed {
            alerts_fired,
            alerts_suppressed,
            exported,
            sink_errors,
        }
    }

    /// Run the consumer loop on a new task.
    ///
    /// On cancellation anything still queued is discarded; sinks are
    /// returned unflushed through [`PipelineTask::shutdown`].
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> PipelineTask {
        let sinks = self.sinks.len();
        let handle = tokio::spawn(self.run(cancel.clone()));
        PipelineTask {
            handle,
            cancel,
            sinks,
        }
    }

    async fn run(mut self, cancel: CancellationToken) -> ExportSinks {
        tracing::debug!(sinks = self.sinks.len(), "Pipeline consumer started");
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(event) => {
                        self.process(&event).await;
                    }
                    None => break,
                },
            }
        }
        self.rx.close();
        let discarded = self.rx.len();
        tracing::debug!(discarded, "Pipeline consumer stopped");
        self.sinks
    }
}

/// Running consumer task.
#[derive(Debug)]
pub struct PipelineTask {
    handle: JoinHandle<ExportSinks>,
    cancel: CancellationToken,
    sinks: usize,
}

/// Upper bound on waiting for the consumer to finish its current event.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

impl PipelineTask {
    /// Stop the consumer and take the sinks back for a final flush.
    ///
    /// If the consumer panicked or hangs, its sinks are dropped unflushed and
    /// an empty set is returned.
    pub async fn shutdown(self) -> ExportSinks {
        self.cancel.cancel();
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.handle).await {
            Ok(Ok(sinks)) => sinks,
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    lost_sinks = self.sinks,
                    "Pipeline consumer task failed, sinks not flushed"
                );
                ExportSinks::default()
            }
            Err(_) => {
                abort.abort();
                tracing::error!(
                    lost_sinks = self.sinks,
                    "Pipeline consumer did not stop in time, sinks not flushed"
                );
                ExportSinks::default()
            }
        }
    }

    /// Sinks the consumer was started with.
    #[must_use]
    pub const fn sink_count(&self) -> usize {
        self.sinks
    }

    /// Whether the consumer has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockAlertNotifier, MockExportSink, SinkError};
    use crate::domain::channel::ChannelName;
    use crate::domain::events::EventPayload;

    fn pool(market_cap: u64) -> FeedEvent {
        let payload = json!({"pa": "P1", "bti": {"a": "T1", "s": "AAA", "mc": market_cap}});
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

    fn min_cap_rules(min: i64) -> PipelineRules {
        PipelineRules::new(
            FilterSet::new(vec![FilterRule {
                min_market_cap: Some(Decimal::from(min)),
                ..FilterRule::new()
            }]),
            vec![AlertCondition::new(
                "any",
                AlertTrigger::AnyEvent,
                Duration::from_secs(60),
            )],
        )
    }

    #[test]
    fn full_queue_drops_exactly_one() {
        let stats = StatsHandle::new();
        let (handle, _worker) = Pipeline::channel(2, PipelineRules::default(), stats.clone());

        assert_eq!(handle.enqueue(pool(1)), EnqueueOutcome::Accepted);
        assert_eq!(handle.enqueue(pool(2)), EnqueueOutcome::Accepted);
        assert_eq!(handle.queue_depth(), 2);
        assert_eq!(handle.enqueue(pool(3)), EnqueueOutcome::Dropped);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped_count, 1);
        assert_eq!(snapshot.enqueued, 2);
    }

    #[test]
    fn closed_consumer_is_a_handler_error() {
        let (handle, worker) = Pipeline::channel(2, PipelineRules::default(), StatsHandle::new());
        drop(worker);
        assert_eq!(handle.enqueue(pool(1)), EnqueueOutcome::Closed);
        assert!(handle.handle(&pool(1)).is_err());
    }

    #[tokio::test]
    async fn filtered_event_skips_alerts_and_export() {
        let stats = StatsHandle::new();
        let mut sink = MockExportSink::new();
        sink.expect_write().never();
        let mut notifier = MockAlertNotifier::new();
        notifier.expect_notify().never();

        let (_handle, worker) = Pipeline::channel(8, min_cap_rules(50_000), stats.clone());
        let mut worker = worker
            .with_sink(Box::new(sink))
            .with_notifier(Arc::new(notifier));

        assert_eq!(worker.process(&pool(40_000)).await, ProcessOutcome::Filtered);
        assert_eq!(stats.snapshot().filtered_out, 1);
    }

    #[tokio::test]
    async fn passing_event_alerts_and_exports() {
        let stats = StatsHandle::new();
        let mut sink = MockExportSink::new();
        sink.expect_write().times(1).returning(|_| Ok(()));
        let mut notifier = MockAlertNotifier::new();
        notifier
            .expect_notify()
            .withf(|alert| alert.condition_id == "any")
            .times(1)
            .return_const(());

        let (_handle, worker) = Pipeline::channel(8, min_cap_rules(50_000), stats.clone());
        let mut worker = worker
            .with_sink(Box::new(sink))
            .with_notifier(Arc::new(notifier));

        assert_eq!(
            worker.process(&pool(60_000)).await,
            ProcessOutcome::Processed {
                alerts_fired: 1,
                alerts_suppressed: 0,
                exported: 1,
                sink_errors: 0
            }
        );
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.alerts_fired, 1);
        assert_eq!(snapshot.exported, 1);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let stats = StatsHandle::new();
        let mut broken = MockExportSink::new();
        broken
            .expect_write()
            .returning(|_| Err(SinkError::Store("disk full".to_string())));
        broken.expect_name().return_const("broken");
        let mut healthy = MockExportSink::new();
        healthy.expect_write().times(2).returning(|_| Ok(()));

        let (_handle, worker) = Pipeline::channel(8, PipelineRules::default(), stats.clone());
        let mut worker = worker.with_sink(Box::new(broken)).with_sink(Box::new(healthy));

        worker.process(&pool(1)).await;
        worker.process(&pool(2)).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sink_errors, 2);
        assert_eq!(snapshot.exported, 2);
    }

    #[tokio::test]
    async fn cooldown_counts_suppressed_alerts() {
        let stats = StatsHandle::new();
        let (_handle, mut worker) = Pipeline::channel(8, min_cap_rules(0), stats.clone());

        for _ in 0..5 {
            worker.process(&pool(10)).await;
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.alerts_fired, 1);
        assert_eq!(snapshot.alerts_suppressed, 4);
    }

    #[tokio::test]
    async fn replaced_rules_apply_to_next_event() {
        let stats = StatsHandle::new();
        let (handle, mut worker) = Pipeline::channel(8, min_cap_rules(50_000), stats.clone());

        assert_eq!(worker.process(&pool(10)).await, ProcessOutcome::Filtered);
        handle.replace_rules(PipelineRules::default());
        assert!(matches!(
            worker.process(&pool(10)).await,
            ProcessOutcome::Processed { .. }
        ));
        assert!(handle.rules().filters.is_empty());
    }

    #[tokio::test]
    async fn spawned_worker_drains_and_returns_sinks() {
        let stats = StatsHandle::new();
        let mut sink = MockExportSink::new();
        sink.expect_write().times(3).returning(|_| Ok(()));
        sink.expect_flush().times(1).returning(|| Ok(()));

        let (handle, worker) = Pipeline::channel(8, PipelineRules::default(), stats.clone());
        let task = worker.with_sink(Box::new(sink)).spawn(CancellationToken::new());

        for cap in 1..=3 {
            handle.enqueue(pool(cap));
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.snapshot().exported < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("events should be exported");

        let mut sinks = task.shutdown().await;
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks.flush_all().await, 0);
    }

    #[tokio::test]
    async fn panicked_worker_reports_lost_sinks() {
        let stats = StatsHandle::new();
        let mut sink = MockExportSink::new();
        sink.expect_write().returning(|_| panic!("sink exploded"));
        sink.expect_flush().never();

        let (handle, worker) = Pipeline::channel(8, PipelineRules::default(), stats);
        let task = worker.with_sink(Box::new(sink)).spawn(CancellationToken::new());
        assert_eq!(task.sink_count(), 1);

        handle.enqueue(pool(1));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !task.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker should stop after the panic");

        let sinks = task.shutdown().await;
        assert!(sinks.is_empty());
    }

    #[test]
    fn settings_rules_include_high_risk_alert() {
        let rules = PipelineRules::from_settings(&FilterSettings::default());
        assert!(rules.filters.is_empty());
        assert_eq!(rules.alerts.len(), 1);
        assert_eq!(rules.alerts[0].cooldown, Duration::from_secs(300));
    }
}
