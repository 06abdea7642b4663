//! Feed Client
//!
//! Caller-facing facade over the registry, the connection manager and the
//! dispatch router.
//!
//! # Example
//!
//! ```rust,no_run
//! use gmgn_stream::{Channel, ClientConfig, FeedClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FeedClient::new(ClientConfig::from_env()?)?;
//! client.connect().await?;
//! client.subscribe(Channel::pool_creation("sol"))?;
//!
//! let mut events = client.events();
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{} {:?}", event.channel, event.token_address());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::stream::EventStream;
use crate::application::ports::{ConnectionError, EventHandler, FeedTransport};
use crate::domain::channel::{Channel, ChannelName};
use crate::domain::connection::ConnectionState;
use crate::domain::stats::{StatsHandle, StatsSnapshot};
use crate::domain::subscription::{
    AccessToken, SubscriptionChange, SubscriptionHandle, SubscriptionRegistry, SubscriptionStatus,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::dispatch::{ChannelAllowList, DispatchError, DispatchRouter, HandlerId};
use crate::infrastructure::gmgn::{
    AuthenticationError, ConnectionIdentity, ConnectionManager, ConnectionParts,
    ExhaustedRetriesError, FatalSlot, SubscriptionCommand, WebSocketTransport, resolve_token,
};
use crate::infrastructure::pipeline::PipelineHandle;

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced to callers of [`FeedClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The first handshake failed.
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// A subscription could not be authenticated.
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// Reconnecting gave up; the client is closed.
    #[error("gave up after {attempts} reconnect attempts")]
    ExhaustedRetries {
        /// Attempts made since the last stable session.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last_error: ConnectionError,
    },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,

    /// `connect` was called on a running client.
    #[error("client is already connected")]
    AlreadyConnected,

    /// Handler registration refused.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<ExhaustedRetriesError> for ClientError {
    fn from(e: ExhaustedRetriesError) -> Self {
        Self::ExhaustedRetries {
            attempts: e.attempts,
            last_error: e.last_error,
        }
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Streaming client for the GMGN feed.
///
/// Subscriptions may be added before or after [`connect`](Self::connect);
/// they are sent immediately when connected and replayed after every
/// reconnect.
pub struct FeedClient {
    access_token: Option<AccessToken>,
    event_buffer: usize,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<DispatchRouter>,
    stats: StatsHandle,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
    manager: Mutex<Option<ConnectionManager>>,
    task: Mutex<Option<JoinHandle<()>>>,
    fatal: FatalSlot,
    cancel: CancellationToken,
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    /// Client over the TLS WebSocket transport, accepting every channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the feed URL is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Arc::new(WebSocketTransport::new(config.identity.clone()));
        Self::with_transport(config, transport, ChannelAllowList::all())
    }

    /// Client over `transport`, dispatching only `allow_list`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the feed URL is invalid.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn FeedTransport>,
        allow_list: ChannelAllowList,
    ) -> Result<Self, ClientError> {
        let url = ConnectionIdentity::generate().connect_url(&config.url)?;
        let stats = StatsHandle::new();
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = Arc::new(DispatchRouter::with_dedupe_window(
            allow_list,
            stats.clone(),
            config.pipeline.dedupe_window,
        ));
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let fatal = FatalSlot::default();
        let cancel = CancellationToken::new();

        let manager = ConnectionManager::new(ConnectionParts {
            url,
            settings: config.websocket.clone(),
            transport,
            registry: Arc::clone(&registry),
            router: Arc::clone(&router),
            stats: stats.clone(),
            state: state_tx,
            commands: commands_rx,
            fatal: Arc::clone(&fatal),
            cancel: cancel.clone(),
        });

        Ok(Self {
            access_token: config.access_token,
            event_buffer: config.pipeline.event_buffer,
            registry,
            router,
            stats,
            state,
            commands,
            manager: Mutex::new(Some(manager)),
            task: Mutex::new(None),
            fatal,
            cancel,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Perform the first handshake and start the connection task.
    ///
    /// A failed handshake leaves the client `Disconnected`; `connect` may be
    /// called again.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Connection`] if the handshake fails
    /// - [`ClientError::AlreadyConnected`] if the connection task is running
    /// - [`ClientError::Closed`] after [`close`](Self::close)
    pub async fn connect(&self) -> Result<(), ClientError> {
        let manager = self.manager.lock().take();
        let Some(mut manager) = manager else {
            return Err(if self.state().is_closed() {
                ClientError::Closed
            } else {
                ClientError::AlreadyConnected
            });
        };
        if self.cancel.is_cancelled() {
            manager.shutdown();
            return Err(ClientError::Closed);
        }

        match manager.connect().await {
            Ok(connection) => {
                let task = tokio::spawn(async move {
                    if let Err(e) = manager.run(connection).await {
                        tracing::error!(error = %e, "GMGN feed client stopped");
                    }
                });
                *self.task.lock() = Some(task);
                Ok(())
            }
            Err(_) if self.cancel.is_cancelled() => {
                manager.shutdown();
                Err(ClientError::Closed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Initial connection failed");
                *self.manager.lock() = Some(manager);
                Err(ClientError::Connection(e))
            }
        }
    }

    /// Stop the connection task and enter `Closed`. Idempotent.
    ///
    /// Events already queued for a pipeline are not processed; flushing
    /// sinks is a separate step.
    pub async fn close(&self) {
        self.cancel.cancel();

        let manager = self.manager.lock().take();
        if let Some(manager) = manager {
            manager.shutdown();
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Connection task failed");
            }
        }

        let mut state = self.state.clone();
        if state.wait_for(|s| s.is_closed()).await.is_err() {
            tracing::debug!("Connection state publisher already gone");
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to `channel` with the client's default token.
    ///
    /// # Errors
    ///
    /// See [`subscribe_with_token`](Self::subscribe_with_token).
    pub fn subscribe(&self, channel: Channel) -> Result<SubscriptionHandle, ClientError> {
        self.subscribe_with_token(channel, None)
    }

    /// Subscribe to `channel`, preferring `token` over the default.
    ///
    /// Subscribing to an already subscribed channel shares it; the channel
    /// is unsubscribed upstream only when every handle is released.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Authentication`] if the channel needs a token and
    ///   none is available; nothing is registered
    /// - [`ClientError::Closed`] after [`close`](Self::close)
    pub fn subscribe_with_token(
        &self,
        channel: Channel,
        token: Option<AccessToken>,
    ) -> Result<SubscriptionHandle, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let token = resolve_token(&channel, token, self.access_token.as_ref())?;
        let (handle, change) = self.registry.acquire(channel.clone(), token);
        if change.needs_wire() {
            self.wake(SubscriptionCommand::Subscribe(channel));
        }
        tracing::debug!(channel = %handle.channel(), ?change, "Subscription added");
        Ok(handle)
    }

    /// Release a subscription handle. Releasing twice is a no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> SubscriptionChange {
        let change = self.registry.remove(handle);
        if change.needs_wire() {
            self.wake(SubscriptionCommand::Unsubscribe(handle.channel().clone()));
        }
        tracing::debug!(channel = %handle.channel(), ?change, "Subscription released");
        change
    }

    fn wake(&self, command: SubscriptionCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Connection task gone; change kept for replay only");
        }
    }

    /// Status of the channel behind `handle`.
    #[must_use]
    pub fn subscription_status(&self, handle: &SubscriptionHandle) -> Option<SubscriptionStatus> {
        self.registry.status(handle.channel())
    }

    /// Status of every tracked subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        self.registry.statuses()
    }

    /// Channels that will be replayed after a reconnect.
    #[must_use]
    pub fn desired_channels(&self) -> BTreeSet<Channel> {
        self.registry.desired_set()
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Run `handler` for every event on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Dispatch`] if the channel is not allowed.
    pub fn register_handler<H>(
        &self,
        channel: ChannelName,
        handler: H,
    ) -> Result<HandlerId, ClientError>
    where
        H: EventHandler + 'static,
    {
        Ok(self.router.register(channel, Arc::new(handler))?)
    }

    /// Remove a handler added with [`register_handler`](Self::register_handler).
    pub fn unregister_handler(&self, channel: ChannelName, id: HandlerId) -> bool {
        self.router.unregister(channel, id)
    }

    /// Feed every event into `pipeline`.
    pub fn attach_pipeline(&self, pipeline: PipelineHandle) -> HandlerId {
        self.router.register_all(Arc::new(pipeline))
    }

    /// Remove a pipeline added with [`attach_pipeline`](Self::attach_pipeline).
    pub fn detach_pipeline(&self, id: HandlerId) -> bool {
        self.router.unregister_all(id)
    }

    /// New arrival-order iterator over every dispatched event.
    ///
    /// Each stream has its own buffer; events dispatched before the stream
    /// was opened are not seen.
    #[must_use]
    pub fn events(&self) -> EventStream {
        EventStream::open(
            Arc::clone(&self.router),
            self.stats.clone(),
            self.state.clone(),
            Arc::clone(&self.fatal),
            self.event_buffer,
        )
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Read-only counters snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for pipelines and the stats endpoint.
    #[must_use]
    pub fn stats_handle(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// The fatal error, once reconnecting gave up.
    #[must_use]
    pub fn fatal_error(&self) -> Option<ClientError> {
        self.fatal.lock().clone().map(ClientError::from)
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
