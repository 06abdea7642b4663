#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! GMGN Stream - Market Feed Client
//!
//! Keeps one WebSocket connection to the GMGN feed, multiplexes channel
//! subscriptions over it, and fans decoded events out to handlers, async
//! iterators and a filter/alert/export pipeline.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core feed types and bookkeeping
//!   - `channel`: Channel catalogue and identity
//!   - `events`: Typed feed events with exact decimals
//!   - `subscription`: Desired/acknowledged subscription registry
//!   - `stats`: Monitoring counters and snapshots
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Socket, handler, sink and notifier interfaces
//!   - `services`: The caller-facing [`FeedClient`] and [`EventStream`]
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gmgn`: Frame codec, WebSocket transport, connection manager
//!   - `dispatch`: Channel-keyed handler fan-out
//!   - `pipeline`: Filters, alerts and export sinks
//!   - `config`: Environment configuration
//!   - `health`: Health, stats and metrics HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────┐     ┌──────────────┐ ──► handlers
//! GMGN WS ──► codec ──►│  connection  │────►│   dispatch   │ ──► event streams
//!                      │   manager    │     │    router    │ ──► pipeline ──► alerts
//!                      └──────────────┘     └──────────────┘                └─► sinks
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gmgn_stream::{Channel, ClientConfig, FeedClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FeedClient::new(ClientConfig::default())?;
//! client.connect().await?;
//! client.subscribe(Channel::pool_creation("sol"))?;
//!
//! let mut events = client.events();
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?.payload);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{Alert, AlertSeverity};
pub use domain::channel::{Channel, ChannelName, ChannelParams};
pub use domain::connection::ConnectionState;
pub use domain::events::{Envelope, EventPayload, FeedEvent, PayloadError};
pub use domain::stats::{StatsHandle, StatsSnapshot};
pub use domain::subscription::{
    AccessToken, SubscriptionChange, SubscriptionHandle, SubscriptionRegistry, SubscriptionStatus,
};

// Ports
pub use application::ports::{
    AlertNotifier, ConnectionError, EventHandler, ExportSink, FeedConnection, FeedTransport,
    HandlerError, SinkError,
};

// Client
pub use application::services::{ClientError, EventStream, FeedClient};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, ExportFormat, ExportSettings, FilterSettings, IdentitySettings,
    PipelineSettings, ServerSettings, WebSocketSettings,
};

// Dispatch
pub use infrastructure::dispatch::{ChannelAllowList, DispatchError, DispatchRouter, HandlerId};

// Pipeline
pub use infrastructure::pipeline::{
    AlertCondition, AlertTrigger, ChannelNotifier, EnqueueOutcome, ExportSinks, FilterRule,
    FilterSet, Pipeline, PipelineHandle, PipelineRules, PipelineTask, PipelineWorker,
    ProcessOutcome, TracingNotifier, build_sink,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
