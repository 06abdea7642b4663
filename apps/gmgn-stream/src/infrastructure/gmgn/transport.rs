//! GMGN WebSocket Transport
//!
//! Opens TLS WebSocket connections to the feed with the browser-like
//! identity the server expects: device identity in the query string plus
//! `Origin`, `User-Agent` and cache headers on the handshake.
//!
//! # Stream URL
//!
//! - Production: `wss://gmgn.ai/ws`

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    ConnectionError, FeedConnection, FeedTransport, FrameReader, FrameWriter, InboundFrame,
    WireFrame,
};
use crate::infrastructure::config::IdentitySettings;

/// Origin header value.
pub const ORIGIN: &str = "https://gmgn.ai";

/// Web app version advertised in the handshake.
pub const APP_VERSION: &str = "20260202-10623-98faccb";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connection Identity
// =============================================================================

/// Device identity sent as query parameters on every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// Device identifier.
    pub device_id: String,
    /// Browser fingerprint identifier.
    pub fp_did: String,
    /// User identifier.
    pub uuid: String,
    /// Advertised app version.
    pub app_version: String,
    /// Time zone name.
    pub tz_name: String,
    /// Time zone offset in seconds.
    pub tz_offset: i32,
    /// UI language.
    pub app_lang: String,
}

impl ConnectionIdentity {
    /// Fresh random identity, stable for the lifetime of one client.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            fp_did: uuid::Uuid::new_v4().simple().to_string(),
            uuid: uuid::Uuid::new_v4().simple().to_string()[..16].to_string(),
            app_version: APP_VERSION.to_string(),
            tz_name: "UTC".to_string(),
            tz_offset: 0,
            app_lang: "en-US".to_string(),
        }
    }

    /// Connect URL for `base` carrying this identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidRequest`] if `base` is not a URL.
    pub fn connect_url(&self, base: &str) -> Result<String, ConnectionError> {
        let client_id = format!("gmgn_web_{}", self.app_version);
        let tz_offset = self.tz_offset.to_string();
        let url = url::Url::parse_with_params(
            base,
            &[
                ("device_id", self.device_id.as_str()),
                ("fp_did", self.fp_did.as_str()),
                ("client_id", client_id.as_str()),
                ("from_app", "gmgn"),
                ("app_ver", self.app_version.as_str()),
                ("tz_name", self.tz_name.as_str()),
                ("tz_offset", tz_offset.as_str()),
                ("app_lang", self.app_lang.as_str()),
                ("os", "web"),
                ("worker", "0"),
                ("uuid", self.uuid.as_str()),
                ("reconnect", "0"),
            ],
        )
        .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
        Ok(url.into())
    }
}

// =============================================================================
// Transport
// =============================================================================

/// TLS WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    identity: IdentitySettings,
}

impl WebSocketTransport {
    /// Create a transport with the given handshake identity.
    #[must_use]
    pub fn new(identity: IdentitySettings) -> Self {
        // Already installed by the binary; a second install is a no-op error.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { identity }
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<FeedConnection, ConnectionError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.identity.user_agent)
                .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(header::ORIGIN, HeaderValue::from_static(ORIGIN));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if let Some(cookie) = &self.identity.cookie {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(cookie)
                    .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?,
            );
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        Ok(FeedConnection {
            writer: Box::new(WsWriter { sink }),
            reader: Box::new(WsReader { stream }),
        })
    }
}

struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, frame: WireFrame) -> Result<(), ConnectionError> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text.into()),
            WireFrame::Ping(data) => Message::Ping(data.into()),
            WireFrame::Pong(data) => Message::Pong(data.into()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| ConnectionError::Socket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .close()
            .await
            .map_err(|e| ConnectionError::Socket(e.to_string()))
    }
}

struct WsReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => InboundFrame::Text(text.to_string()),
                Ok(Message::Binary(data)) => InboundFrame::Binary(data.to_vec()),
                Ok(Message::Ping(data)) => InboundFrame::Ping(data.to_vec()),
                Ok(Message::Pong(data)) => InboundFrame::Pong(data.to_vec()),
                Ok(Message::Close(frame)) => {
                    InboundFrame::Close(frame.map(|f| f.reason.to_string()))
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(ConnectionError::Socket(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }
}
