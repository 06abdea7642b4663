//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// GMGN WebSocket adapter: codec, transport and connection manager.
pub mod gmgn;

/// Fan-out of typed events to registered handlers.
pub mod dispatch;

/// Filter, alert and export stages.
pub mod pipeline;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
