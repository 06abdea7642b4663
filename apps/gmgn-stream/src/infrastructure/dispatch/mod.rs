//! Dispatch Router
//!
//! Routes decoded envelopes to the handlers registered for their channel.
//!
//! - The set of channels the router accepts is fixed at construction
//!   ([`ChannelAllowList`]); envelopes outside it are ignored.
//! - Handlers run in registration order. A failing or panicking handler is
//!   counted and logged; the remaining handlers still run.
//! - Envelopes whose sequence token was seen recently on the same channel
//!   are still delivered, with [`FeedEvent::duplicate`] set.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::application::ports::EventHandler;
use crate::domain::channel::ChannelName;
use crate::domain::events::{Envelope, EventPayload, FeedEvent};
use crate::domain::stats::{StatCounter, StatsHandle};

/// Default number of sequence tokens remembered per channel.
pub const DEFAULT_DEDUPE_WINDOW: usize = 4096;

/// Identifier returned by handler registration.
pub type HandlerId = u64;

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The channel is not in the router's allow-list.
    #[error("channel {0} is not in the allow-list")]
    NotAllowed(ChannelName),
}

// =============================================================================
// Allow-list
// =============================================================================

/// Immutable set of channels a router accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAllowList(BTreeSet<ChannelName>);

impl ChannelAllowList {
    /// Every known channel.
    #[must_use]
    pub fn all() -> Self {
        Self(ChannelName::all().iter().copied().collect())
    }

    /// Only the given channels.
    #[must_use]
    pub fn only(channels: impl IntoIterator<Item = ChannelName>) -> Self {
        Self(channels.into_iter().collect())
    }

    /// Whether `channel` is accepted.
    #[must_use]
    pub fn allows(&self, channel: ChannelName) -> bool {
        self.0.contains(&channel)
    }

    /// Accepted channels in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = ChannelName> + '_ {
        self.0.iter().copied()
    }
}

impl Default for ChannelAllowList {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// Duplicate Window
// =============================================================================

/// Bounded memory of recently seen sequence tokens.
#[derive(Debug)]
struct SequenceWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl SequenceWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity,
        }
    }

    /// Returns `true` if `sequence` was already in the window.
    fn observe(&mut self, sequence: &str) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.seen.contains(sequence) {
            return true;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.order.push_back(sequence.to_string());
        self.seen.insert(sequence.to_string());
        false
    }
}

// =============================================================================
// Router
// =============================================================================

struct Registration {
    id: HandlerId,
    scope: Option<ChannelName>,
    handler: Arc<dyn EventHandler>,
}

/// Routes envelopes to per-channel handlers.
pub struct DispatchRouter {
    allow_list: ChannelAllowList,
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    windows: Mutex<HashMap<ChannelName, SequenceWindow>>,
    dedupe_window: usize,
    stats: StatsHandle,
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("allow_list", &self.allow_list)
            .field("handlers", &self.registrations.read().len())
            .field("dedupe_window", &self.dedupe_window)
            .finish_non_exhaustive()
    }
}

impl DispatchRouter {
    /// Create a router accepting `allow_list`.
    #[must_use]
    pub fn new(allow_list: ChannelAllowList, stats: StatsHandle) -> Self {
        Self::with_dedupe_window(allow_list, stats, DEFAULT_DEDUPE_WINDOW)
    }

    /// Create a router remembering `dedupe_window` sequence tokens per
    /// channel (0 disables duplicate marking).
    #[must_use]
    pub fn with_dedupe_window(
        allow_list: ChannelAllowList,
        stats: StatsHandle,
        dedupe_window: usize,
    ) -> Self {
        Self {
            allow_list,
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            windows: Mutex::new(HashMap::new()),
            dedupe_window,
            stats,
        }
    }

    /// Channels this router accepts.
    #[must_use]
    pub const fn allow_list(&self) -> &ChannelAllowList {
        &self.allow_list
    }

    /// Register `handler` for `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotAllowed`] if the channel is outside the
    /// allow-list.
    pub fn register(
        &self,
        channel: ChannelName,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, DispatchError> {
        if !self.allow_list.allows(channel) {
            return Err(DispatchError::NotAllowed(channel));
        }
        Ok(self.push(Some(channel), handler))
    }

    /// Register `handler` for every allowed channel.
    pub fn register_all(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.push(None, handler)
    }

    /// Remove a handler registered with [`register`](Self::register).
    ///
    /// Returns `false` if no such registration exists.
    pub fn unregister(&self, channel: ChannelName, id: HandlerId) -> bool {
        self.remove(|r| r.id == id && r.scope == Some(channel))
    }

    /// Remove a handler registered with [`register_all`](Self::register_all).
    pub fn unregister_all(&self, id: HandlerId) -> bool {
        self.remove(|r| r.id == id && r.scope.is_none())
    }

    /// Number of handlers that would receive events on `channel`.
    #[must_use]
    pub fn handler_count(&self, channel: ChannelName) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.scope.is_none_or(|c| c == channel))
            .count()
    }

    /// Type the envelope's payload and fan the events out.
    ///
    /// Returns the number of events derived from the envelope.
    pub fn dispatch(&self, envelope: Envelope) -> usize {
        let channel = envelope.channel;
        if !self.allow_list.allows(channel) {
            tracing::trace!(channel = %channel, "Envelope outside allow-list ignored");
            return 0;
        }

        self.stats.record_message(channel);

        let payloads = match EventPayload::parse(channel, &envelope.payload) {
            Ok(payloads) => payloads,
            Err(e) => {
                self.stats.increment(StatCounter::PayloadErrors);
                tracing::warn!(channel = %channel, error = %e, "Invalid payload dropped");
                return 0;
            }
        };

        let duplicate = envelope
            .sequence
            .as_deref()
            .is_some_and(|sequence| self.observe_sequence(channel, sequence));

        let handlers: Vec<Arc<dyn EventHandler>> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.scope.is_none_or(|c| c == channel))
            .map(|r| Arc::clone(&r.handler))
            .collect();

        let count = payloads.len();
        for payload in payloads {
            let event = FeedEvent {
                channel,
                sequence: envelope.sequence.clone(),
                received_at: envelope.received_at,
                duplicate,
                payload,
            };
            self.stats.record_event(&event);

            for handler in &handlers {
                self.invoke(handler.as_ref(), &event);
            }
        }
        count
    }

    fn invoke(&self, handler: &dyn EventHandler, event: &FeedEvent) {
        match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.increment(StatCounter::HandlerErrors);
                tracing::warn!(
                    channel = %event.channel,
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
            }
            Err(_) => {
                self.stats.increment(StatCounter::HandlerErrors);
                tracing::error!(
                    channel = %event.channel,
                    handler = handler.name(),
                    "Handler panicked"
                );
            }
        }
    }

    fn observe_sequence(&self, channel: ChannelName, sequence: &str) -> bool {
        self.windows
            .lock()
            .entry(channel)
            .or_insert_with(|| SequenceWindow::new(self.dedupe_window))
            .observe(sequence)
    }

    fn push(&self, scope: Option<ChannelName>, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            handler_id = id,
            channel = scope.map_or("*", ChannelName::as_str),
            handler = handler.name(),
            "Handler registered"
        );
        self.registrations.write().push(Registration { id, scope, handler });
        id
    }

    fn remove(&self, matches: impl Fn(&Registration) -> bool) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| !matches(r));
        registrations.len() != before
    }
}
