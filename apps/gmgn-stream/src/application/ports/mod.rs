//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedTransport`: Opens a connection to the feed endpoint
//! - `FrameWriter` / `FrameReader`: The two halves of one connection
//! - `ExportSink`: Durable destination for processed events
//! - `AlertNotifier`: Delivery of fired alerts
//!
//! ## Driver Ports (Inbound)
//!
//! - `EventHandler`: Caller-supplied consumer of typed events

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::alert::Alert;
use crate::domain::events::FeedEvent;

// =============================================================================
// Frames
// =============================================================================

/// Frame read from the feed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping control frame; must be answered with a pong.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close frame with optional reason.
    Close(Option<String>),
}

/// Frame to write to the feed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
}

// =============================================================================
// Connection Errors
// =============================================================================

/// Handshake or socket failure. Triggers a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connect request could not be built.
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),

    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Reading or writing the socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The peer closed the connection.
    #[error("connection closed by peer{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    /// No inbound traffic within the heartbeat timeout.
    #[error("no inbound traffic for {0:?}")]
    HeartbeatTimeout(Duration),

    /// Too many undecodable frames inside the sliding window.
    #[error("{errors} decode errors within {window:?}")]
    CorruptStream {
        /// Errors counted in the window.
        errors: usize,
        /// Window length.
        window: Duration,
    },
}

// =============================================================================
// Transport Ports
// =============================================================================

/// Write half of a feed connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one frame.
    async fn send(&mut self, frame: WireFrame) -> Result<(), ConnectionError>;

    /// Send a close frame and shut the write half down.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Read half of a feed connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>>;
}

/// An open connection, split into its halves.
pub struct FeedConnection {
    /// Write half.
    pub writer: Box<dyn FrameWriter>,
    /// Read half.
    pub reader: Box<dyn FrameReader>,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection").finish_non_exhaustive()
    }
}

/// Opens connections to the feed endpoint.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Perform the handshake with `url`.
    async fn connect(&self, url: &str) -> Result<FeedConnection, ConnectionError>;
}

// =============================================================================
// Event Handler
// =============================================================================

/// A caller-supplied handler failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Build an error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Consumes one event and may fail independently of other handlers.
///
/// Closures of the form `Fn(&FeedEvent) -> Result<(), HandlerError>`
/// implement this trait.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// A failure is counted and logged; it never stops other handlers.
    fn handle(&self, event: &FeedEvent) -> Result<(), HandlerError>;

    /// Identity used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> EventHandler for F
where
    F: Fn(&FeedEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &FeedEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

// =============================================================================
// Export Sink
// =============================================================================

/// A sink failed to record an event. Counted per sink, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization failure.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Tabular writer failure.
    #[error("csv error: {0}")]
    Csv(String),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Invalid sink configuration.
    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// Durable destination for processed events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportSink: Send {
    /// Record one event.
    async fn write(&mut self, event: &FeedEvent) -> Result<(), SinkError>;

    /// Push buffered records to durable storage.
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Sink identity for logs and metrics.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Alert Notifier
// =============================================================================

/// Receives alerts that passed their cooldown.
#[cfg_attr(test, mockall::automock)]
pub trait AlertNotifier: Send + Sync {
    /// Deliver one alert.
    fn notify(&self, alert: &Alert);
}
