//! GMGN WebSocket Adapters
//!
//! Implements the client side of GMGN's public streaming feed:
//!
//! - **Codec**: JSON frames to envelopes and back
//! - **Transport**: TLS WebSocket with browser-like handshake identity
//! - **Connection**: socket lifecycle, heartbeat, reconnect and replay

pub mod auth;
pub mod codec;
pub mod connection;
pub mod decode_window;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use auth::{AccessToken, AuthenticationError, is_auth_rejection, resolve_token};
pub use codec::{
    AckError, AckFrame, CodecError, DecodeError, DecodedFrame, FrameCodec, OutboundFrame,
};
pub use connection::{
    ConnectionManager, ConnectionParts, ExhaustedRetriesError, FatalSlot, SubscriptionCommand,
};
pub use decode_window::{DecodeErrorWindow, DecodeWindowConfig};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{SubscriptionRequest, new_request_id};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::{ConnectionIdentity, WebSocketTransport};
