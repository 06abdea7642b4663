//! Shared test harness: an in-memory feed server behind the transport port.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gmgn_stream::application::ports::{FrameReader, FrameWriter, InboundFrame, WireFrame};
use gmgn_stream::{
    ChannelAllowList, ClientConfig, ConnectionError, FeedClient, FeedConnection, FeedTransport,
    WebSocketSettings,
};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(2);

type InboundTx = mpsc::UnboundedSender<Option<Result<InboundFrame, ConnectionError>>>;

struct Writer(mpsc::UnboundedSender<WireFrame>);

#[async_trait]
impl FrameWriter for Writer {
    async fn send(&mut self, frame: WireFrame) -> Result<(), ConnectionError> {
        self.0
            .send(frame)
            .map_err(|_| ConnectionError::Socket("server gone".to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

struct Reader(mpsc::UnboundedReceiver<Option<Result<InboundFrame, ConnectionError>>>);

#[async_trait]
impl FrameReader for Reader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ConnectionError>> {
        self.0.recv().await.flatten()
    }
}

/// Server side of one accepted connection.
pub struct ServerSession {
    sent: mpsc::UnboundedReceiver<WireFrame>,
    inbound: InboundTx,
}

impl ServerSession {
    /// Next text frame the client wrote, parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = timeout(WAIT, self.sent.recv())
                .await
                .expect("client frame within timeout")
                .expect("client still connected");
            if let WireFrame::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Whether the client wrote nothing more within `window`.
    pub async fn is_quiet_for(&mut self, window: Duration) -> bool {
        loop {
            match timeout(window, self.sent.recv()).await {
                Err(_) | Ok(None) => return true,
                Ok(Some(WireFrame::Text(_))) => return false,
                Ok(Some(_)) => {}
            }
        }
    }

    /// Push a JSON text frame to the client.
    pub fn send_json(&self, value: &Value) {
        self.inbound
            .send(Some(Ok(InboundFrame::Text(value.to_string()))))
            .unwrap();
    }

    /// Acknowledge a subscribe frame the client sent.
    pub fn ack(&self, request: &Value) {
        self.send_json(&serde_json::json!({"channel": "ack", "id": request["id"]}));
    }

    /// End the stream as if the socket dropped.
    pub fn drop_socket(&self) {
        let _ = self.inbound.send(None);
    }
}

/// Accepts connections according to a script; refuses once the script ends.
pub struct MockFeed {
    script: Mutex<VecDeque<bool>>,
    accepted: mpsc::UnboundedSender<ServerSession>,
}

impl MockFeed {
    /// Transport plus the queue of sessions it accepts.
    pub fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSession>) {
        let (accepted, sessions) = mpsc::unbounded_channel();
        let feed = Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            accepted,
        });
        (feed, sessions)
    }
}

#[async_trait]
impl FeedTransport for MockFeed {
    async fn connect(&self, _url: &str) -> Result<FeedConnection, ConnectionError> {
        if !self.script.lock().pop_front().unwrap_or(false) {
            return Err(ConnectionError::Handshake("connection refused".to_string()));
        }
        let (out_tx, sent) = mpsc::unbounded_channel();
        let (inbound, in_rx) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerSession { sent, inbound });
        Ok(FeedConnection {
            writer: Box::new(Writer(out_tx)),
            reader: Box::new(Reader(in_rx)),
        })
    }
}

/// Config with short timers for tests.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        url: "wss://feed.test/ws".to_string(),
        websocket: WebSocketSettings {
            reconnect_delay_initial: Duration::from_millis(100),
            reconnect_delay_max: Duration::from_millis(200),
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 2,
            ..WebSocketSettings::default()
        },
        ..ClientConfig::default()
    }
}

/// Client over a [`MockFeed`] with the given accept script.
pub fn client(script: &[bool]) -> (FeedClient, mpsc::UnboundedReceiver<ServerSession>) {
    let (feed, sessions) = MockFeed::new(script);
    let client = FeedClient::with_transport(test_config(), feed, ChannelAllowList::all()).unwrap();
    (client, sessions)
}

/// Next accepted session.
pub async fn accept(sessions: &mut mpsc::UnboundedReceiver<ServerSession>) -> ServerSession {
    timeout(WAIT, sessions.recv())
        .await
        .expect("connection within timeout")
        .expect("transport alive")
}

/// Poll `condition` until it holds or the wait bound passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition within timeout");
}

/// Pool-creation frame for one pool with the given token and market cap.
pub fn pool_frame(sequence: &str, token: &str, market_cap: u64) -> Value {
    serde_json::json!({
        "channel": "new_pool_info",
        "id": sequence,
        "data": [{
            "c": "sol",
            "p": [{"pa": format!("pool-{token}"), "ex": "raydium", "bti": {"a": token, "s": "TKN", "mc": market_cap.to_string(), "hc": 500}}]
        }]
    })
}
