//! GMGN WebSocket Message Types
//!
//! Wire format for outbound subscription requests and the reserved inbound
//! channel names.
//!
//! # Outbound
//!
//! ```json
//! {"action":"subscribe","channel":"new_pool_info","f":"w",
//!  "id":"3f2a9c0d1e4b5a6c","data":[{"chain":"sol"}]}
//! ```
//!
//! Authenticated channels additionally carry `"access_token"`.
//!
//! # Inbound
//!
//! Every frame is a JSON object with a `channel` field. `ack` and `error`
//! are acknowledgements for an earlier request `id`; `pong` and
//! `heartbeat` are liveness replies; everything else is data.

use std::collections::BTreeMap;

use serde::Serialize;

/// Channel name of acknowledgement frames.
pub const ACK_CHANNEL: &str = "ack";

/// Channel name of error acknowledgement frames.
pub const ERROR_CHANNEL: &str = "error";

/// Channel names of application-level liveness replies.
pub const HEARTBEAT_CHANNELS: &[&str] = &["pong", "heartbeat"];

/// Format marker sent with every request.
pub const FORMAT_MARKER: &str = "w";

/// Length of generated request identifiers.
pub const REQUEST_ID_LEN: usize = 16;

/// Outbound subscribe/unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest<'a> {
    /// `subscribe` or `unsubscribe`.
    pub action: &'a str,
    /// Wire channel name.
    pub channel: &'a str,
    /// Format marker.
    pub f: &'a str,
    /// Request identifier echoed by the ack.
    pub id: &'a str,
    /// Channel parameters, one object.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<BTreeMap<&'a str, &'a str>>,
    /// Bearer token for authenticated channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<&'a str>,
}

/// Generate a fresh request identifier.
#[must_use]
pub fn new_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(REQUEST_ID_LEN);
    id
}
