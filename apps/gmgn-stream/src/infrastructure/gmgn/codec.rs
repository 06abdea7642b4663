//! Frame Codec
//!
//! Translates between raw socket frames and structured messages.
//!
//! Decoding classifies each inbound frame as an acknowledgement, a
//! heartbeat reply, or a data envelope. Encoding is pure: the same
//! [`OutboundFrame`] always produces the same [`WireFrame`].
//!
//! A frame that cannot be parsed yields [`DecodeError::Malformed`]; a frame
//! naming a channel this client does not know yields
//! [`DecodeError::UnknownChannel`]. Neither is fatal on its own.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::application::ports::WireFrame;
use crate::domain::channel::{Channel, ChannelName};
use crate::domain::events::Envelope;
use crate::domain::subscription::{AccessToken, SubscriptionAction};
use crate::infrastructure::gmgn::messages::{
    ACK_CHANNEL, ERROR_CHANNEL, FORMAT_MARKER, HEARTBEAT_CHANNELS, SubscriptionRequest,
};

// =============================================================================
// Errors
// =============================================================================

/// Inbound frame could not be turned into a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not a JSON object, or missing the `channel` field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Well-formed frame on a channel this client does not know.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// Outbound frame could not be serialized.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Messages
// =============================================================================

/// Rejection details carried by an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckError {
    /// Numeric status code, when the server sent one.
    pub code: Option<i64>,
    /// Human-readable reason.
    pub message: String,
}

/// Server acknowledgement of an earlier subscribe/unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Request identifier being acknowledged.
    pub request_id: Option<String>,
    /// Channel being acknowledged, when echoed.
    pub channel: Option<ChannelName>,
    /// Present when the request was rejected.
    pub error: Option<AckError>,
}

impl AckFrame {
    /// Whether the request was accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Subscription acknowledgement.
    Ack(AckFrame),
    /// Data for a known channel.
    Data(Envelope),
    /// Application-level liveness reply.
    Heartbeat,
}

/// Structured outbound message.
#[derive(Debug, Clone, Copy)]
pub enum OutboundFrame<'a> {
    /// Subscribe to a channel.
    Subscribe {
        /// Channel to subscribe.
        channel: &'a Channel,
        /// Request identifier echoed by the ack.
        request_id: &'a str,
        /// Token for authenticated channels.
        token: Option<&'a AccessToken>,
    },
    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Channel to unsubscribe.
        channel: &'a Channel,
        /// Request identifier echoed by the ack.
        request_id: &'a str,
    },
    /// Liveness probe.
    Heartbeat,
}

// =============================================================================
// Codec
// =============================================================================

/// JSON codec for the GMGN WebSocket feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a frame received now.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the frame is not a JSON object with a
    /// `channel`, or names an unknown channel.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
        self.decode_at(bytes, Utc::now())
    }

    /// Decode a frame, stamping envelopes with `received_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the frame is not a JSON object with a
    /// `channel`, or names an unknown channel.
    pub fn decode_at(
        &self,
        bytes: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<DecodedFrame, DecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let Value::Object(mut object) = value else {
            return Err(DecodeError::Malformed("expected JSON object".to_string()));
        };

        let channel = object
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DecodeError::Malformed("missing channel".to_string()))?;

        if channel == ACK_CHANNEL || channel == ERROR_CHANNEL {
            return Ok(DecodedFrame::Ack(decode_ack(&channel, &object)));
        }

        if HEARTBEAT_CHANNELS.contains(&channel.as_str()) {
            return Ok(DecodedFrame::Heartbeat);
        }

        let name = ChannelName::from_wire(&channel)
            .ok_or_else(|| DecodeError::UnknownChannel(channel.clone()))?;

        let sequence = object.get("id").and_then(id_string);
        let payload = match object.remove("data") {
            Some(Value::Null) | None => Value::Object(object),
            Some(data) => data,
        };

        Ok(DecodedFrame::Data(Envelope {
            channel: name,
            payload,
            sequence,
            received_at,
        }))
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization fails.
    pub fn encode(&self, frame: &OutboundFrame<'_>) -> Result<WireFrame, CodecError> {
        match *frame {
            OutboundFrame::Subscribe {
                channel,
                request_id,
                token,
            } => encode_request(
                SubscriptionAction::Subscribe,
                channel,
                request_id,
                token.map(AccessToken::expose),
            ),
            OutboundFrame::Unsubscribe {
                channel,
                request_id,
            } => encode_request(SubscriptionAction::Unsubscribe, channel, request_id, None),
            OutboundFrame::Heartbeat => Ok(WireFrame::Ping(Vec::new())),
        }
    }
}

fn encode_request(
    action: SubscriptionAction,
    channel: &Channel,
    request_id: &str,
    token: Option<&str>,
) -> Result<WireFrame, CodecError> {
    let params: BTreeMap<&str, &str> = channel.params().iter().collect();
    let request = SubscriptionRequest {
        action: action.as_str(),
        channel: channel.name().wire_name(),
        f: FORMAT_MARKER,
        id: request_id,
        data: if params.is_empty() { vec![] } else { vec![params] },
        access_token: token,
    };
    Ok(WireFrame::Text(serde_json::to_string(&request)?))
}

fn decode_ack(channel: &str, object: &Map<String, Value>) -> AckFrame {
    let data = object.get("data");

    let request_id = object
        .get("id")
        .and_then(id_string)
        .or_else(|| data.and_then(|d| d.get("id")).and_then(id_string));

    let acked_channel = data
        .and_then(|d| d.get("channel"))
        .or_else(|| object.get("sub_channel"))
        .and_then(Value::as_str)
        .and_then(ChannelName::from_wire);

    let code = object
        .get("code")
        .or_else(|| data.and_then(|d| d.get("code")))
        .and_then(code_value);

    let failed_status = object
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("fail"));

    let rejected = channel == ERROR_CHANNEL || failed_status || code.is_some_and(|c| c != 0);

    let error = rejected.then(|| AckError {
        code,
        message: ["message", "msg", "error"]
            .iter()
            .find_map(|key| {
                object
                    .get(*key)
                    .or_else(|| data.and_then(|d| d.get(*key)))
                    .and_then(Value::as_str)
            })
            .unwrap_or("rejected")
            .to_string(),
    });

    AckFrame {
        request_id,
        channel: acked_channel,
        error,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn code_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
