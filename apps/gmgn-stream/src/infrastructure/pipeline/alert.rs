//! Alert Conditions
//!
//! Conditions are evaluated against events that survived filtering. Each
//! condition has its own cooldown: the first match fires and stamps the
//! condition, later matches inside the cooldown are suppressed and counted.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::application::ports::AlertNotifier;
use crate::domain::alert::{Alert, AlertSeverity};
use crate::domain::channel::ChannelName;
use crate::domain::events::FeedEvent;
use crate::infrastructure::pipeline::filter::risk_score;

/// What makes a condition match.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTrigger {
    /// Market cap strictly above the threshold.
    MarketCapAbove(Decimal),
    /// Liquidity strictly above the threshold.
    LiquidityAbove(Decimal),
    /// 24h volume strictly above the threshold.
    VolumeAbove(Decimal),
    /// Derived risk score strictly above the threshold.
    RiskScoreAbove(f64),
    /// Symbol contains any of the fragments (case-insensitive).
    SymbolContains(Vec<String>),
    /// Every event.
    AnyEvent,
}

impl AlertTrigger {
    fn matches(&self, event: &FeedEvent) -> bool {
        let payload = &event.payload;
        match self {
            Self::MarketCapAbove(min) => payload.market_cap_usd().is_some_and(|v| v > *min),
            Self::LiquidityAbove(min) => payload.liquidity_usd().is_some_and(|v| v > *min),
            Self::VolumeAbove(min) => payload.volume_24h_usd().is_some_and(|v| v > *min),
            Self::RiskScoreAbove(min) => risk_score(event) > *min,
            Self::SymbolContains(fragments) => payload.symbol().is_some_and(|symbol| {
                let symbol = symbol.to_uppercase();
                fragments
                    .iter()
                    .any(|fragment| symbol.contains(&fragment.to_uppercase()))
            }),
            Self::AnyEvent => true,
        }
    }

    fn describe(&self, event: &FeedEvent) -> String {
        let payload = &event.payload;
        match self {
            Self::MarketCapAbove(min) => format!(
                "market cap {} above {min}",
                payload.market_cap_usd().unwrap_or_default()
            ),
            Self::LiquidityAbove(min) => format!(
                "liquidity {} above {min}",
                payload.liquidity_usd().unwrap_or_default()
            ),
            Self::VolumeAbove(min) => format!(
                "24h volume {} above {min}",
                payload.volume_24h_usd().unwrap_or_default()
            ),
            Self::RiskScoreAbove(min) => {
                format!("risk score {:.2} above {min:.2}", risk_score(event))
            }
            Self::SymbolContains(_) => {
                format!("symbol {} flagged", payload.symbol().unwrap_or("?"))
            }
            Self::AnyEvent => format!("{} event", event.channel),
        }
    }
}

/// A rate-limited alert rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCondition {
    /// Unique identifier; cooldown state is keyed by it.
    pub id: String,
    /// What makes the condition match.
    pub trigger: AlertTrigger,
    /// Minimum time between two delivered alerts.
    pub cooldown: Duration,
    /// Channels the condition watches; empty means all.
    pub channels: BTreeSet<ChannelName>,
    /// Severity of delivered alerts.
    pub severity: AlertSeverity,
}

impl AlertCondition {
    /// Condition watching every channel.
    #[must_use]
    pub fn new(id: impl Into<String>, trigger: AlertTrigger, cooldown: Duration) -> Self {
        Self {
            id: id.into(),
            trigger,
            cooldown,
            channels: BTreeSet::new(),
            severity: AlertSeverity::default(),
        }
    }

    /// Watch only `channels`.
    #[must_use]
    pub fn on_channels(mut self, channels: impl IntoIterator<Item = ChannelName>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Set the severity of delivered alerts.
    #[must_use]
    pub const fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether `event` satisfies the condition, ignoring cooldown.
    #[must_use]
    pub fn matches(&self, event: &FeedEvent) -> bool {
        (self.channels.is_empty() || self.channels.contains(&event.channel))
            && self.trigger.matches(event)
    }

    fn alert_for(&self, event: &FeedEvent) -> Alert {
        Alert {
            condition_id: self.id.clone(),
            severity: self.severity,
            channel: event.channel,
            message: self.trigger.describe(event),
            token_address: event.token_address().map(str::to_string),
            symbol: event.payload.symbol().map(str::to_string),
            sequence: event.sequence.clone(),
            fired_at: Utc::now(),
        }
    }
}

/// Outcome of one matching condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    /// Cooldown elapsed; deliver.
    Fired(Alert),
    /// Matched inside the cooldown; count only.
    Suppressed(String),
}

/// Per-condition cooldown bookkeeping.
#[derive(Debug, Default)]
pub struct AlertEngine {
    last_fired: HashMap<String, Instant>,
}

impl AlertEngine {
    /// Engine with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `conditions` against `event` now.
    pub fn evaluate(&mut self, conditions: &[AlertCondition], event: &FeedEvent) -> Vec<AlertDecision> {
        self.evaluate_at(conditions, event, Instant::now())
    }

    /// Evaluate `conditions` against `event` at `now`.
    pub fn evaluate_at(
        &mut self,
        conditions: &[AlertCondition],
        event: &FeedEvent,
        now: Instant,
    ) -> Vec<AlertDecision> {
        conditions
            .iter()
            .filter(|condition| condition.matches(event))
            .map(|condition| {
                let cooling = self
                    .last_fired
                    .get(&condition.id)
                    .is_some_and(|last| now.saturating_duration_since(*last) < condition.cooldown);
                if cooling {
                    AlertDecision::Suppressed(condition.id.clone())
                } else {
                    self.last_fired.insert(condition.id.clone(), now);
                    AlertDecision::Fired(condition.alert_for(event))
                }
            })
            .collect()
    }
}

// =============================================================================
// Notifiers
// =============================================================================

/// Logs alerts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl AlertNotifier for TracingNotifier {
    fn notify(&self, alert: &Alert) {
        let token = alert.token_address.as_deref().unwrap_or("-");
        match alert.severity {
            AlertSeverity::Info => tracing::info!(
                condition = %alert.condition_id,
                channel = %alert.channel,
                token,
                "Alert: {}",
                alert.message
            ),
            AlertSeverity::Warning | AlertSeverity::Critical => tracing::warn!(
                condition = %alert.condition_id,
                channel = %alert.channel,
                severity = ?alert.severity,
                token,
                "Alert: {}",
                alert.message
            ),
        }
    }
}

/// Forwards alerts into a bounded channel; drops when the receiver lags.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Alert>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AlertNotifier for ChannelNotifier {
    fn notify(&self, alert: &Alert) {
        if self.tx.try_send(alert.clone()).is_err() {
            tracing::warn!(condition = %alert.condition_id, "Alert receiver full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::events::EventPayload;

    fn pool(symbol: &str, market_cap: u64) -> FeedEvent {
        let payload = json!({"pa": "P1", "bti": {"a": "T1", "s": symbol, "mc": market_cap}});
        FeedEvent {
            channel: ChannelName::PoolCreation,
            sequence: Some("7".to_string()),
            received_at: Utc::now(),
            duplicate: false,
            payload: EventPayload::parse(ChannelName::PoolCreation, &payload)
                .unwrap()
                .remove(0),
        }
    }

    fn big_cap(cooldown: Duration) -> AlertCondition {
        AlertCondition::new(
            "big-cap",
            AlertTrigger::MarketCapAbove(Decimal::from(50_000)),
            cooldown,
        )
    }

    #[test]
    fn cooldown_delivers_once_then_suppresses() {
        let conditions = vec![big_cap(Duration::from_secs(60))];
        let mut engine = AlertEngine::new();
        let start = Instant::now();
        let event = pool("AAA", 60_000);

        let decisions: Vec<_> = (0..5)
            .flat_map(|i| engine.evaluate_at(&conditions, &event, start + Duration::from_secs(i)))
            .collect();

        let fired = decisions
            .iter()
            .filter(|d| matches!(d, AlertDecision::Fired(_)))
            .count();
        assert_eq!(fired, 1);
        assert_eq!(decisions.len() - fired, 4);
    }

    #[test]
    fn fires_again_after_cooldown() {
        let conditions = vec![big_cap(Duration::from_secs(10))];
        let mut engine = AlertEngine::new();
        let start = Instant::now();
        let event = pool("AAA", 60_000);

        engine.evaluate_at(&conditions, &event, start);
        let later = engine.evaluate_at(&conditions, &event, start + Duration::from_secs(10));

        assert!(matches!(later.as_slice(), [AlertDecision::Fired(_)]));
    }

    #[test]
    fn non_matching_event_leaves_no_decision() {
        let conditions = vec![big_cap(Duration::from_secs(10))];
        let mut engine = AlertEngine::new();
        assert!(engine.evaluate(&conditions, &pool("AAA", 40_000)).is_empty());
    }

    #[test]
    fn cooldowns_are_per_condition() {
        let conditions = vec![
            big_cap(Duration::from_secs(60)),
            AlertCondition::new(
                "flagged",
                AlertTrigger::SymbolContains(vec!["rug".to_string()]),
                Duration::from_secs(60),
            ),
        ];
        let mut engine = AlertEngine::new();
        let decisions = engine.evaluate(&conditions, &pool("RUGME", 60_000));
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| matches!(d, AlertDecision::Fired(_))));
    }

    #[test]
    fn channel_scope_is_respected() {
        let condition = AlertCondition::new("any", AlertTrigger::AnyEvent, Duration::ZERO)
            .on_channels([ChannelName::PairUpdate]);
        assert!(!condition.matches(&pool("AAA", 1)));
    }

    #[test]
    fn fired_alert_carries_event_context() {
        let condition = big_cap(Duration::ZERO).with_severity(AlertSeverity::Warning);
        let mut engine = AlertEngine::new();
        let decisions = engine.evaluate(&[condition], &pool("AAA", 60_000));

        let [AlertDecision::Fired(alert)] = decisions.as_slice() else {
            panic!("expected one fired alert");
        };
        assert_eq!(alert.condition_id, "big-cap");
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.token_address.as_deref(), Some("T1"));
        assert_eq!(alert.symbol.as_deref(), Some("AAA"));
        assert_eq!(alert.sequence.as_deref(), Some("7"));
        assert!(alert.message.contains("60000"));
    }

    #[tokio::test]
    async fn channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new(4);
        let mut engine = AlertEngine::new();
        let decisions = engine.evaluate(&[big_cap(Duration::ZERO)], &pool("AAA", 60_000));
        let [AlertDecision::Fired(alert)] = decisions.as_slice() else {
            panic!("expected one fired alert");
        };

        notifier.notify(alert);

        assert_eq!(rx.recv().await.unwrap().condition_id, "big-cap");
    }
}
