//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the caller-facing client service and the port
//! interfaces that infrastructure adapters implement.

/// Port interfaces for the feed socket, handlers, sinks and notifiers.
pub mod ports;

/// Caller-facing feed client.
pub mod services;
