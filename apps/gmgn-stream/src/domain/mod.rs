//! Domain Layer - Core feed types and bookkeeping.
//!
//! This layer contains the channel catalogue, typed feed events, the
//! subscription registry and the monitoring accumulator. Nothing here
//! performs I/O.

/// Alerts raised by the pipeline.
pub mod alert;

/// Channel names, parameter bags and channel identity.
pub mod channel;

/// Connection lifecycle states.
pub mod connection;

/// Typed feed events with exact decimal fields.
pub mod events;

/// Monitoring counters and read-only snapshots.
pub mod stats;

/// Desired/acknowledged subscription tracking.
pub mod subscription;
