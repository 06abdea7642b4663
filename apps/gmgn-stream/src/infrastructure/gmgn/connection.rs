//! Connection Manager
//!
//! Owns the single feed socket and the [`ConnectionState`] machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                                              |
//!                                              +-> Closed (attempts exhausted)
//! any state -> Closed (close requested)
//! ```
//!
//! On every handshake the connection generation is bumped and every desired,
//! unacknowledged subscription is replayed. A single task reads the socket,
//! answers pings, forwards heartbeat probes and applies subscription
//! commands, so all writes go through this one owner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthenticationError, is_auth_rejection};
use super::codec::{AckFrame, DecodeError, DecodedFrame, FrameCodec, OutboundFrame};
use super::decode_window::{DecodeErrorWindow, DecodeWindowConfig};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::new_request_id;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    ConnectionError, FeedConnection, FeedTransport, FrameWriter, InboundFrame, WireFrame,
};
use crate::domain::channel::Channel;
use crate::domain::connection::ConnectionState;
use crate::domain::stats::{StatCounter, StatsHandle};
use crate::domain::subscription::{
    AckOutcome, Generation, SubscriptionRegistry, UnsubscribeStep,
};
use crate::infrastructure::config::WebSocketSettings;
use crate::infrastructure::dispatch::DispatchRouter;
use crate::infrastructure::metrics::CONNECTION_STATE;

// =============================================================================
// Commands and Errors
// =============================================================================

/// Wake-up sent by callers after changing the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    /// A channel became desired.
    Subscribe(Channel),
    /// A channel lost its last holder.
    Unsubscribe(Channel),
}

/// Reconnect attempts ran out; the connection is closed for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gave up after {attempts} reconnect attempts: {last_error}")]
pub struct ExhaustedRetriesError {
    /// Attempts made since the last stable session.
    pub attempts: u32,
    /// Failure of the final attempt.
    pub last_error: ConnectionError,
}

/// Slot holding the fatal error, written once before entering `Closed`.
pub type FatalSlot = Arc<Mutex<Option<ExhaustedRetriesError>>>;

// =============================================================================
// Connection Manager
// =============================================================================

/// Socket lifecycle owner.
pub struct ConnectionManager {
    url: String,
    settings: WebSocketSettings,
    transport: Arc<dyn FeedTransport>,
    codec: FrameCodec,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<DispatchRouter>,
    stats: StatsHandle,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    fatal: FatalSlot,
    cancel: CancellationToken,
    generation: Generation,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Everything the manager shares with the client facade.
pub struct ConnectionParts {
    /// Connect URL including identity query parameters.
    pub url: String,
    /// Timing and retry settings.
    pub settings: WebSocketSettings,
    /// Socket factory.
    pub transport: Arc<dyn FeedTransport>,
    /// Desired subscriptions.
    pub registry: Arc<SubscriptionRegistry>,
    /// Envelope fan-out.
    pub router: Arc<DispatchRouter>,
    /// Shared counters.
    pub stats: StatsHandle,
    /// State publisher; the manager is its only writer.
    pub state: watch::Sender<ConnectionState>,
    /// Subscription wake-ups.
    pub commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    /// Fatal error slot.
    pub fatal: FatalSlot,
    /// Close signal.
    pub cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager in `Disconnected`.
    #[must_use]
    pub fn new(parts: ConnectionParts) -> Self {
        Self {
            url: parts.url,
            settings: parts.settings,
            transport: parts.transport,
            codec: FrameCodec::new(),
            registry: parts.registry,
            router: parts.router,
            stats: parts.stats,
            state: parts.state,
            commands: parts.commands,
            fatal: parts.fatal,
            cancel: parts.cancel,
            generation: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Connection generation; bumped on every successful handshake.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// First handshake: `Disconnected -> Connecting -> Connected`.
    ///
    /// On failure the state falls back to `Disconnected` and the manager can
    /// be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the handshake fails, times out, or the
    /// manager is cancelled meanwhile.
    pub async fn connect(&mut self) -> Result<FeedConnection, ConnectionError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %redact_query(&self.url), "Connecting to GMGN feed");

        let result = tokio::select! {
            () = self.cancel.cancelled() => Err(ConnectionError::Closed(Some("close requested".to_string()))),
            result = self.establish() => result,
        };
        match result {
            Ok(connection) => {
                self.on_established();
                Ok(connection)
            }
            Err(e) => {
                self.stats.increment(StatCounter::ConnectionErrors);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Mark the manager closed without ever running it.
    pub fn shutdown(self) {
        self.set_state(ConnectionState::Closed);
    }

    /// Serve `connection`, reconnecting on failure, until closed or out of
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ExhaustedRetriesError`] after the final failed attempt; the
    /// state is `Closed` either way.
    pub async fn run(mut self, connection: FeedConnection) -> Result<(), ExhaustedRetriesError> {
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_websocket_settings(&self.settings));
        let mut connection = connection;

        loop {
            let connected_at = Instant::now();
            let failure = match self.serve(connection).await {
                Ok(()) => {
                    tracing::info!("GMGN feed connection closed");
                    self.set_state(ConnectionState::Closed);
                    return Ok(());
                }
                Err(e) => e,
            };

            self.stats.increment(StatCounter::ConnectionErrors);
            tracing::warn!(
                generation = self.generation,
                connected_ms = u64::try_from(connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "GMGN feed connection lost"
            );
            policy.record_session(connected_at.elapsed());
            self.set_state(ConnectionState::Reconnecting);
            self.registry.mark_unacknowledged_all();

            connection = match self.reconnect(&mut policy, failure).await {
                Ok(Some(connection)) => connection,
                Ok(None) => {
                    tracing::info!("Close requested while reconnecting");
                    self.set_state(ConnectionState::Closed);
                    return Ok(());
                }
                Err(exhausted) => {
                    tracing::error!(
                        attempts = exhausted.attempts,
                        error = %exhausted.last_error,
                        "Reconnect attempts exhausted"
                    );
                    *self.fatal.lock() = Some(exhausted.clone());
                    self.set_state(ConnectionState::Closed);
                    return Err(exhausted);
                }
            };
        }
    }

    /// Back off and retry until a handshake succeeds.
    ///
    /// `Ok(None)` means close was requested.
    async fn reconnect(
        &mut self,
        policy: &mut ReconnectPolicy,
        mut last_error: ConnectionError,
    ) -> Result<Option<FeedConnection>, ExhaustedRetriesError> {
        loop {
            let Some(delay) = policy.next_delay() else {
                return Err(ExhaustedRetriesError {
                    attempts: policy.attempt_count(),
                    last_error,
                });
            };
            let attempt = policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to GMGN feed"
            );

            if !self.backoff(delay).await {
                return Ok(None);
            }

            let result = tokio::select! {
                () = self.cancel.cancelled() => return Ok(None),
                result = self.establish() => result,
            };
            match result {
                Ok(connection) => {
                    self.stats.increment(StatCounter::Reconnects);
                    self.on_established();
                    tracing::info!(attempt, generation = self.generation, "Reconnected to GMGN feed");
                    return Ok(Some(connection));
                }
                Err(e) => {
                    self.stats.increment(StatCounter::ConnectionErrors);
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e;
                }
            }
        }
    }

    /// Sleep for `delay` while draining commands. Returns `false` on close.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_offline(&command),
                    None => return false,
                },
            }
        }
    }

    async fn establish(&self) -> Result<FeedConnection, ConnectionError> {
        let timeout = self.settings.connect_timeout;
        tokio::time::timeout(timeout, self.transport.connect(&self.url))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
    }

    fn on_established(&mut self) {
        self.generation += 1;
        self.set_state(ConnectionState::Connected);
    }

    /// Read loop for one connection. `Ok(())` means close was requested.
    async fn serve(&mut self, connection: FeedConnection) -> Result<(), ConnectionError> {
        let FeedConnection {
            mut writer,
            mut reader,
        } = connection;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                HeartbeatConfig::from_websocket_settings(&self.settings),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let mut decode_window =
            DecodeErrorWindow::new(DecodeWindowConfig::from_websocket_settings(&self.settings));

        self.replay(writer.as_mut()).await?;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    if let Err(e) = writer.close().await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    return Ok(());
                }
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        heartbeat_state.mark_ping_sent();
                        let ping = self.encode(&OutboundFrame::Heartbeat)?;
                        writer.send(ping).await?;
                    }
                    Some(HeartbeatEvent::Timeout(silence)) => {
                        return Err(ConnectionError::HeartbeatTimeout(silence));
                    }
                    None => {
                        return Err(ConnectionError::Socket("heartbeat monitor stopped".to_string()));
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(&command, writer.as_mut()).await?,
                    None => {
                        // Client dropped without close.
                        if let Err(e) = writer.close().await {
                            tracing::debug!(error = %e, "Close frame not delivered");
                        }
                        return Ok(());
                    }
                },
                frame = reader.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        heartbeat_state.record_inbound();
                        self.on_frame(frame, writer.as_mut(), &mut decode_window).await?;
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(ConnectionError::Closed(None)),
                },
            }
        }
    }

    /// Subscribe every desired channel not yet sent on this connection.
    async fn replay(&self, writer: &mut dyn FrameWriter) -> Result<(), ConnectionError> {
        let pending = self.registry.pending_replay();
        let mut sent = 0;
        for channel in &pending {
            if self.send_subscribe(channel, writer).await? {
                sent += 1;
            }
        }
        if sent > 0 {
            tracing::info!(generation = self.generation, channels = sent, "Subscriptions replayed");
        }
        Ok(())
    }

    async fn send_subscribe(
        &self,
        channel: &Channel,
        writer: &mut dyn FrameWriter,
    ) -> Result<bool, ConnectionError> {
        let request_id = new_request_id();
        let Some(token) = self
            .registry
            .begin_subscribe(channel, self.generation, &request_id)
        else {
            return Ok(false);
        };
        let frame = self.encode(&OutboundFrame::Subscribe {
            channel,
            request_id: &request_id,
            token: token.as_ref(),
        })?;
        writer.send(frame).await?;
        tracing::debug!(channel = %channel, request_id = %request_id, "Subscribe sent");
        Ok(true)
    }

    async fn apply(
        &self,
        command: &SubscriptionCommand,
        writer: &mut dyn FrameWriter,
    ) -> Result<(), ConnectionError> {
        match command {
            SubscriptionCommand::Subscribe(channel) => {
                self.send_subscribe(channel, writer).await?;
            }
            SubscriptionCommand::Unsubscribe(channel) => {
                let request_id = new_request_id();
                match self
                    .registry
                    .begin_unsubscribe(channel, self.generation, &request_id)
                {
                    UnsubscribeStep::Send => {
                        let frame = self.encode(&OutboundFrame::Unsubscribe {
                            channel,
                            request_id: &request_id,
                        })?;
                        writer.send(frame).await?;
                        tracing::debug!(channel = %channel, request_id = %request_id, "Unsubscribe sent");
                    }
                    UnsubscribeStep::Dropped => {
                        tracing::debug!(channel = %channel, "Subscription dropped before it was sent");
                    }
                    UnsubscribeStep::Skip => {}
                }
            }
        }
        Ok(())
    }

    /// Commands arriving with no socket: subscribes wait for replay,
    /// unsubscribes of never-sent channels are dropped.
    fn apply_offline(&self, command: &SubscriptionCommand) {
        if let SubscriptionCommand::Unsubscribe(channel) = command {
            let step = self
                .registry
                .begin_unsubscribe(channel, self.generation, &new_request_id());
            tracing::debug!(channel = %channel, ?step, "Unsubscribe while offline");
        }
    }

    async fn on_frame(
        &self,
        frame: InboundFrame,
        writer: &mut dyn FrameWriter,
        decode_window: &mut DecodeErrorWindow,
    ) -> Result<(), ConnectionError> {
        match frame {
            InboundFrame::Text(text) => self.on_payload(text.as_bytes(), decode_window),
            InboundFrame::Binary(bytes) => self.on_payload(&bytes, decode_window),
            InboundFrame::Ping(data) => writer.send(WireFrame::Pong(data)).await,
            InboundFrame::Pong(_) => Ok(()),
            InboundFrame::Close(reason) => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "Server sent close frame");
                Err(ConnectionError::Closed(reason))
            }
        }
    }

    fn on_payload(
        &self,
        bytes: &[u8],
        decode_window: &mut DecodeErrorWindow,
    ) -> Result<(), ConnectionError> {
        match self.codec.decode(bytes) {
            Ok(DecodedFrame::Data(envelope)) => {
                self.router.dispatch(envelope);
            }
            Ok(DecodedFrame::Ack(ack)) => self.on_ack(&ack),
            Ok(DecodedFrame::Heartbeat) => {}
            Err(DecodeError::UnknownChannel(channel)) => {
                self.stats.increment(StatCounter::UnknownChannelFrames);
                tracing::debug!(channel = %channel, "Dropping frame for unknown channel");
            }
            Err(DecodeError::Malformed(reason)) => {
                self.stats.increment(StatCounter::DecodeErrors);
                tracing::debug!(reason = %reason, "Dropping malformed frame");
                if decode_window.record_error() {
                    let window = decode_window.config().window;
                    let errors = decode_window.count_at(Instant::now());
                    tracing::error!(errors, window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX), "Decode error rate exceeded, resetting connection");
                    return Err(ConnectionError::CorruptStream { errors, window });
                }
            }
        }
        Ok(())
    }

    fn on_ack(&self, ack: &AckFrame) {
        let reason = ack.error.as_ref().map(|e| e.message.clone());
        match self
            .registry
            .resolve_ack(ack.request_id.as_deref(), ack.channel, reason)
        {
            AckOutcome::Acknowledged(channel) => {
                tracing::info!(channel = %channel, "Subscription acknowledged");
            }
            AckOutcome::Unsubscribed(channel) => {
                tracing::debug!(channel = %channel, "Unsubscribe acknowledged");
            }
            AckOutcome::Rejected {
                channel,
                action,
                reason,
            } => {
                let code = ack.error.as_ref().and_then(|e| e.code);
                if is_auth_rejection(code, &reason) {
                    let error = AuthenticationError::Rejected { channel, reason };
                    tracing::error!(code, error = %error, "Subscription rejected");
                } else {
                    tracing::warn!(
                        channel = %channel,
                        action = action.as_str(),
                        code,
                        reason = %reason,
                        "Subscription request rejected"
                    );
                }
            }
            AckOutcome::Stale(channel) => {
                tracing::debug!(channel = %channel, "Stale acknowledgement ignored");
            }
            AckOutcome::Unmatched => {
                tracing::debug!(request_id = ?ack.request_id, "Unmatched acknowledgement");
            }
        }
    }

    fn encode(&self, frame: &OutboundFrame<'_>) -> Result<WireFrame, ConnectionError> {
        self.codec
            .encode(frame)
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(state = next.as_str(), "Connection state changed");
            metrics::gauge!(CONNECTION_STATE).set(next.as_gauge());
        }
    }
}

/// Strip the query string; it carries device identity.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::FrameReader;
    use crate::domain::channel::ChannelName;
    use crate::infrastructure::dispatch::ChannelAllowList;

    type Inbound = mpsc::UnboundedSender<Option<Result<InboundFrame, ConnectionError>>>;

    struct Writer(mpsc::UnboundedSender<WireFrame>);

    #[async_trait]
    impl FrameWriter for Writer {
        async fn send(&mut self, frame: WireFrame) -> Result<(), ConnectionError> {
            self.0
                .send(frame)
                .map_err(|_| ConnectionError::Socket("peer gone".to_string()))
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

    /// Hands out scripted connection results in order; refuses once empty.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), ConnectionError>>>,
        accepted: mpsc::UnboundedSender<(mpsc::UnboundedReceiver<WireFrame>, Inbound)>,
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn connect(&self, _url: &str) -> Result<FeedConnection, ConnectionError> {
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ConnectionError::Handshake("refused".to_string())));
            next?;
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.accepted.send((out_rx, in_tx)).unwrap();
            Ok(FeedConnection {
                writer: Box::new(Writer(out_tx)),
                reader: Box::new(Reader(in_rx)),
            })
        }
    }

    struct Harness {
        manager: ConnectionManager,
        registry: Arc<SubscriptionRegistry>,
        stats: StatsHandle,
        state: watch::Receiver<ConnectionState>,
        accepted: mpsc::UnboundedReceiver<(mpsc::UnboundedReceiver<WireFrame>, Inbound)>,
        commands: mpsc::UnboundedSender<SubscriptionCommand>,
        cancel: CancellationToken,
        fatal: FatalSlot,
    }

    fn test_settings() -> WebSocketSettings {
        WebSocketSettings {
            reconnect_delay_initial: Duration::from_millis(5),
            reconnect_delay_max: Duration::from_millis(20),
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 2,
            decode_error_threshold: 3,
            ..WebSocketSettings::default()
        }
    }

    fn harness(script: Vec<Result<(), ConnectionError>>) -> Harness {
        harness_with(script, test_settings())
    }

    fn harness_with(
        script: Vec<Result<(), ConnectionError>>,
        settings: WebSocketSettings,
    ) -> Harness {
        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(ScriptedTransport {
            script: Mutex::new(script.into()),
            accepted: accepted_tx,
        });
        let registry = Arc::new(SubscriptionRegistry::new());
        let stats = StatsHandle::new();
        let router = Arc::new(DispatchRouter::new(ChannelAllowList::all(), stats.clone()));
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fatal = FatalSlot::default();
        let manager = ConnectionManager::new(ConnectionParts {
            url: "wss://feed.test/ws?device_id=x".to_string(),
            settings,
            transport,
            registry: Arc::clone(&registry),
            router,
            stats: stats.clone(),
            state: state_tx,
            commands: commands_rx,
            fatal: Arc::clone(&fatal),
            cancel: cancel.clone(),
        });
        Harness {
            manager,
            registry,
            stats,
            state,
            accepted,
            commands,
            cancel,
            fatal,
        }
    }

    fn subscribe_channel(frame: &WireFrame) -> Option<String> {
        let WireFrame::Text(text) = frame else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        (value["action"] == "subscribe").then(|| value["channel"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn failed_first_connect_returns_to_disconnected() {
        let mut h = harness(vec![Err(ConnectionError::Handshake("nope".to_string()))]);
        assert!(h.manager.connect().await.is_err());
        assert_eq!(*h.state.borrow(), ConnectionState::Disconnected);
        assert_eq!(h.stats.snapshot().connection_errors, 1);
    }

    #[tokio::test]
    async fn connect_replays_desired_channels() {
        let mut h = harness(vec![Ok(())]);
        h.registry.add(Channel::pool_creation("sol"));
        h.registry.add(Channel::chain_stat("sol"));

        let connection = h.manager.connect().await.unwrap();
        assert_eq!(*h.state.borrow(), ConnectionState::Connected);
        let task = tokio::spawn(h.manager.run(connection));

        let (mut sent, _inbound) = h.accepted.recv().await.unwrap();
        let mut channels = vec![
            subscribe_channel(&sent.recv().await.unwrap()).unwrap(),
            subscribe_channel(&sent.recv().await.unwrap()).unwrap(),
        ];
        channels.sort();
        assert_eq!(channels, ["chain_stat", "new_pool_info"]);

        h.cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(*h.state.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn server_ping_is_answered() {
        let mut h = harness(vec![Ok(())]);
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));
        let (mut sent, inbound) = h.accepted.recv().await.unwrap();

        inbound.send(Some(Ok(InboundFrame::Ping(vec![7])))).unwrap();
        assert_eq!(sent.recv().await.unwrap(), WireFrame::Pong(vec![7]));

        h.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn command_while_connected_sends_once() {
        let mut h = harness(vec![Ok(())]);
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));
        let (mut sent, _inbound) = h.accepted.recv().await.unwrap();

        let channel = Channel::pool_creation("sol");
        h.registry.add(channel.clone());
        h.commands
            .send(SubscriptionCommand::Subscribe(channel.clone()))
            .unwrap();
        h.commands
            .send(SubscriptionCommand::Subscribe(channel))
            .unwrap();

        assert!(subscribe_channel(&sent.recv().await.unwrap()).is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.try_recv().is_err());

        h.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drop_reconnects_and_replays_everything() {
        let mut h = harness(vec![Ok(()), Ok(())]);
        h.registry.add(Channel::pool_creation("sol"));
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));

        let (mut sent, inbound) = h.accepted.recv().await.unwrap();
        sent.recv().await.unwrap();
        inbound.send(None).unwrap();

        let (mut resent, _inbound) = h.accepted.recv().await.unwrap();
        assert_eq!(
            subscribe_channel(&resent.recv().await.unwrap()).as_deref(),
            Some("new_pool_info")
        );
        assert_eq!(*h.state.borrow(), ConnectionState::Connected);
        assert_eq!(h.stats.snapshot().reconnects, 1);

        h.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silent_socket_reconnects_and_replays() {
        let mut h = harness_with(
            vec![Ok(()), Ok(())],
            WebSocketSettings {
                ping_interval: Duration::from_millis(10),
                heartbeat_timeout: Duration::from_millis(40),
                reconnect_delay_initial: Duration::from_millis(100),
                reconnect_delay_max: Duration::from_millis(200),
                ..test_settings()
            },
        );
        h.registry.add(Channel::pool_creation("sol"));
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));

        let (mut sent, _silent) = h.accepted.recv().await.unwrap();
        assert_eq!(
            subscribe_channel(&sent.recv().await.unwrap()).as_deref(),
            Some("new_pool_info")
        );

        tokio::time::timeout(
            Duration::from_secs(2),
            h.state.wait_for(|s| *s == ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();

        let (mut resent, _inbound) =
            tokio::time::timeout(Duration::from_secs(2), h.accepted.recv())
                .await
                .unwrap()
                .unwrap();
        let replayed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(channel) = subscribe_channel(&resent.recv().await.unwrap()) {
                    return channel;
                }
            }
        })
        .await
        .unwrap();
        h.cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(replayed, "new_pool_info");
        assert_eq!(h.stats.snapshot().reconnects, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_close_with_fatal_error() {
        let mut h = harness(vec![Ok(())]);
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));

        let (_sent, inbound) = h.accepted.recv().await.unwrap();
        inbound
            .send(Some(Err(ConnectionError::Socket("reset".to_string()))))
            .unwrap();

        let error = task.await.unwrap().unwrap_err();
        assert_eq!(error.attempts, 2);
        assert_eq!(*h.state.borrow(), ConnectionState::Closed);
        assert_eq!(h.fatal.lock().as_ref(), Some(&error));
    }

    #[tokio::test]
    async fn corrupt_stream_forces_reconnect() {
        let mut h = harness(vec![Ok(()), Ok(())]);
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));

        let (_sent, inbound) = h.accepted.recv().await.unwrap();
        for _ in 0..3 {
            inbound
                .send(Some(Ok(InboundFrame::Text("not json".to_string()))))
                .unwrap();
        }

        let _second = h.accepted.recv().await.unwrap();
        assert_eq!(h.stats.snapshot().decode_errors, 3);

        h.cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ack_and_data_flow_through() {
        let mut h = harness(vec![Ok(())]);
        h.registry.add(Channel::pool_creation("sol"));
        let connection = h.manager.connect().await.unwrap();
        let task = tokio::spawn(h.manager.run(connection));
        let (mut sent, inbound) = h.accepted.recv().await.unwrap();

        let WireFrame::Text(subscribe) = sent.recv().await.unwrap() else {
            panic!("expected text subscribe frame");
        };
        let id = serde_json::from_str::<serde_json::Value>(&subscribe).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        inbound
            .send(Some(Ok(InboundFrame::Text(
                serde_json::json!({"channel": "ack", "id": id}).to_string(),
            ))))
            .unwrap();
        inbound
            .send(Some(Ok(InboundFrame::Text(
                r#"{"channel":"mystery","data":{}}"#.to_string(),
            ))))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let acked = h
                    .registry
                    .status(&Channel::pool_creation("sol"))
                    .is_some_and(|s| s.acknowledged);
                if acked && h.stats.snapshot().unknown_channel_frames == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        h.cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(
            h.registry.desired_set().iter().map(Channel::name).collect::<Vec<_>>(),
            [ChannelName::PoolCreation]
        );
    }

    #[test]
    fn query_is_redacted_from_logs() {
        assert_eq!(redact_query("wss://gmgn.ai/ws?device_id=1"), "wss://gmgn.ai/ws");
        assert_eq!(redact_query("wss://gmgn.ai/ws"), "wss://gmgn.ai/ws");
    }
}
