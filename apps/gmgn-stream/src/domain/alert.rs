//! Alert values raised by the pipeline's alert stage.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::channel::ChannelName;

/// How loud an alert should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational.
    #[default]
    Info,
    /// Worth a look.
    Warning,
    /// Needs attention now.
    Critical,
}

/// A delivered alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Identifier of the condition that fired.
    pub condition_id: String,
    /// Severity configured on the condition.
    pub severity: AlertSeverity,
    /// Channel of the triggering event.
    pub channel: ChannelName,
    /// Human-readable description.
    pub message: String,
    /// Token the triggering event was about.
    pub token_address: Option<String>,
    /// Token symbol, when known.
    pub symbol: Option<String>,
    /// Sequence token of the triggering event.
    pub sequence: Option<String>,
    /// Time the alert fired.
    pub fired_at: DateTime<Utc>,
}
