//! Subscription Registry
//!
//! Tracks which channels callers want and what the server has acknowledged.
//!
//! # Design
//!
//! The registry tracks, per canonical channel:
//! - Which holders (handles) currently want it, for reference counting
//! - Whether it is desired and whether the server acknowledged it
//! - Which connection generation last carried its subscribe frame
//!
//! The desired set is the single source of truth for replay after a
//! reconnect. Connection failures never clear it; only the last holder's
//! `remove` does.
//!
//! Outbound frames are prepared under the registry lock
//! ([`SubscriptionRegistry::begin_subscribe`] and
//! [`SubscriptionRegistry::begin_unsubscribe`]) so a caller-triggered send
//! and a reconnect replay can never both send the same subscribe on one
//! connection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::channel::{Channel, ChannelName};

// =============================================================================
// Types
// =============================================================================

/// Identifier of one `add` call.
pub type HolderId = u64;

/// Connection generation; incremented by the connection manager on every
/// successful handshake.
pub type Generation = u64;

/// Opaque bearer token attached to authenticated subscribe frames.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token; returns `None` for blank input.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Raw token for the wire.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Handle returned by `add`; pass it back to `remove`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: Channel,
    holder: HolderId,
}

impl SubscriptionHandle {
    /// Channel this handle holds.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Holder identifier.
    #[must_use]
    pub const fn holder(&self) -> HolderId {
        self.holder
    }
}

/// Outbound subscription frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Effect of an `add` or `remove` on the upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// First holder; the channel must be subscribed upstream.
    Added,
    /// Channel already desired; nothing to send.
    Shared,
    /// Last holder gone; the channel must be unsubscribed upstream.
    Removed,
    /// Other holders remain; nothing to send.
    Retained,
    /// The handle was not (or no longer) held.
    NotHeld,
}

impl SubscriptionChange {
    /// Whether the connection manager has work to do.
    #[must_use]
    pub const fn needs_wire(self) -> bool {
        matches!(self, Self::Added | Self::Removed)
    }
}

/// What to do with a queued unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeStep {
    /// Send an unsubscribe frame; the entry is dropped when it is acked.
    Send,
    /// The server never saw the subscribe on this connection; dropped now.
    Dropped,
    /// The channel is desired again (or unknown); nothing to do.
    Skip,
}

/// Result of matching an acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Subscribe confirmed.
    Acknowledged(Channel),
    /// Unsubscribe confirmed; the entry is gone.
    Unsubscribed(Channel),
    /// The server refused the request.
    Rejected {
        /// Affected channel.
        channel: Channel,
        /// Request kind that was refused.
        action: SubscriptionAction,
        /// Server-provided reason.
        reason: String,
    },
    /// The ack refers to a request superseded by a later add/remove.
    Stale(Channel),
    /// No outstanding request matches.
    Unmatched,
}

/// Read-only view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    /// Channel identity.
    pub channel: Channel,
    /// Whether any holder still wants the channel.
    pub desired: bool,
    /// Whether the server acknowledged it on the current connection.
    pub acknowledged: bool,
    /// When the last subscribe frame was sent.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Number of live handles.
    pub holders: usize,
    /// Last server rejection, cleared by a successful ack.
    pub error: Option<String>,
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug)]
struct Entry {
    holders: HashSet<HolderId>,
    desired: bool,
    acknowledged: bool,
    last_sent_at: Option<DateTime<Utc>>,
    sent_generation: Option<Generation>,
    token: Option<AccessToken>,
    error: Option<String>,
}

impl Entry {
    fn new() -> Self {
        Self {
            holders: HashSet::new(),
            desired: false,
            acknowledged: false,
            last_sent_at: None,
            sent_generation: None,
            token: None,
            error: None,
        }
    }

    fn status(&self, channel: &Channel) -> SubscriptionStatus {
        SubscriptionStatus {
            channel: channel.clone(),
            desired: self.desired,
            acknowledged: self.acknowledged,
            last_sent_at: self.last_sent_at,
            holders: self.holders.len(),
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<Channel, Entry>,
    pending: HashMap<String, (Channel, SubscriptionAction)>,
    next_holder: HolderId,
}

impl RegistryState {
    fn take_pending(
        &mut self,
        request_id: Option<&str>,
        channel: Option<ChannelName>,
    ) -> Option<(Channel, SubscriptionAction)> {
        if let Some(found) = request_id.and_then(|id| self.pending.remove(id)) {
            return Some(found);
        }
        // Fall back to the oldest outstanding request on the named channel.
        let name = channel?;
        let key = self
            .pending
            .iter()
            .filter(|(_, (ch, _))| ch.name() == name)
            .min_by_key(|(_, (ch, _))| {
                self.entries
                    .get(ch)
                    .and_then(|e| e.last_sent_at)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            })
            .map(|(id, _)| id.clone())?;
        self.pending.remove(&key)
    }

    fn forget_pending(&mut self, channel: &Channel) {
        self.pending.retain(|_, (ch, _)| ch != channel);
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of desired and acknowledged subscriptions.
///
/// # Example
///
/// ```rust
/// use gmgn_stream::domain::channel::Channel;
/// use gmgn_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
///
/// let first = registry.add(Channel::pool_creation("sol"));
/// let second = registry.add(Channel::pool_creation("sol"));
/// assert_eq!(registry.len(), 1);
///
/// registry.remove(&first);
/// assert_eq!(registry.len(), 1);
///
/// registry.remove(&second);
/// assert!(registry.desired_set().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a holder for `channel`.
    ///
    /// Adding an already desired channel shares the existing subscription.
    pub fn add(&self, channel: Channel) -> SubscriptionHandle {
        self.acquire(channel, None).0
    }

    /// Add a holder for `channel`, remembering the token used to subscribe.
    ///
    /// A later token replaces an earlier one for replay.
    pub fn acquire(
        &self,
        channel: Channel,
        token: Option<AccessToken>,
    ) -> (SubscriptionHandle, SubscriptionChange) {
        let mut state = self.state.write();
        state.next_holder += 1;
        let holder = state.next_holder;

        let entry = state.entries.entry(channel.clone()).or_insert_with(Entry::new);
        entry.holders.insert(holder);
        if token.is_some() {
            entry.token = token;
        }

        let change = if entry.desired {
            SubscriptionChange::Shared
        } else {
            entry.desired = true;
            entry.error = None;
            SubscriptionChange::Added
        };

        (SubscriptionHandle { channel, holder }, change)
    }

    /// Release a handle.
    ///
    /// Removing a handle twice is a no-op; reference counts never go
    /// negative.
    pub fn remove(&self, handle: &SubscriptionHandle) -> SubscriptionChange {
        let mut state = self.state.write();
        let Some(entry) = state.entries.get_mut(&handle.channel) else {
            return SubscriptionChange::NotHeld;
        };
        if !entry.holders.remove(&handle.holder) {
            return SubscriptionChange::NotHeld;
        }
        if entry.holders.is_empty() {
            entry.desired = false;
            SubscriptionChange::Removed
        } else {
            SubscriptionChange::Retained
        }
    }

    /// Channels that must be subscribed after any reconnect.
    #[must_use]
    pub fn desired_set(&self) -> BTreeSet<Channel> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.desired)
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Desired channels not yet acknowledged on the current connection.
    #[must_use]
    pub fn pending_replay(&self) -> Vec<Channel> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.desired && !e.acknowledged)
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Mark a desired channel as acknowledged by the server.
    ///
    /// Returns `false` when the channel is not desired.
    pub fn mark_acknowledged(&self, channel: &Channel) -> bool {
        let mut state = self.state.write();
        match state.entries.get_mut(channel) {
            Some(entry) if entry.desired => {
                entry.acknowledged = true;
                entry.error = None;
                true
            }
            _ => false,
        }
    }

    /// Forget everything the previous connection acknowledged.
    ///
    /// Called on entering `Reconnecting`. Desired entries stay and will be
    /// replayed; undesired entries are dropped because the new connection
    /// never carried them.
    pub fn mark_unacknowledged_all(&self) {
        let mut state = self.state.write();
        state.entries.retain(|_, e| e.desired);
        for entry in state.entries.values_mut() {
            entry.acknowledged = false;
            entry.sent_generation = None;
        }
        state.pending.clear();
    }

    /// Claim the right to send a subscribe frame for `channel`.
    ///
    /// Returns the token to attach, or `None` when the channel is no longer
    /// desired or was already sent on `generation`.
    pub fn begin_subscribe(
        &self,
        channel: &Channel,
        generation: Generation,
        request_id: &str,
    ) -> Option<Option<AccessToken>> {
        let mut state = self.state.write();
        let entry = state.entries.get_mut(channel)?;
        if !entry.desired || entry.sent_generation == Some(generation) {
            return None;
        }
        entry.sent_generation = Some(generation);
        entry.acknowledged = false;
        entry.last_sent_at = Some(Utc::now());
        let token = entry.token.clone();
        state.forget_pending(channel);
        state.pending.insert(
            request_id.to_string(),
            (channel.clone(), SubscriptionAction::Subscribe),
        );
        Some(token)
    }

    /// Decide what to do with an unsubscribe for `channel`.
    pub fn begin_unsubscribe(
        &self,
        channel: &Channel,
        generation: Generation,
        request_id: &str,
    ) -> UnsubscribeStep {
        let mut state = self.state.write();
        let Some(entry) = state.entries.get_mut(channel) else {
            return UnsubscribeStep::Skip;
        };
        if entry.desired {
            return UnsubscribeStep::Skip;
        }
        if entry.sent_generation == Some(generation) {
            entry.sent_generation = None;
            entry.acknowledged = false;
            state.forget_pending(channel);
            state.pending.insert(
                request_id.to_string(),
                (channel.clone(), SubscriptionAction::Unsubscribe),
            );
            UnsubscribeStep::Send
        } else {
            state.entries.remove(channel);
            state.forget_pending(channel);
            UnsubscribeStep::Dropped
        }
    }

    /// Match an acknowledgement to an outstanding request.
    ///
    /// `request_id` is preferred; without it the oldest outstanding request
    /// on `channel` is used.
    pub fn resolve_ack(
        &self,
        request_id: Option<&str>,
        channel: Option<ChannelName>,
        error: Option<String>,
    ) -> AckOutcome {
        let mut state = self.state.write();
        let Some((channel, action)) = state.take_pending(request_id, channel) else {
            return AckOutcome::Unmatched;
        };
        let Some(entry) = state.entries.get_mut(&channel) else {
            return AckOutcome::Stale(channel);
        };

        if let Some(reason) = error {
            if action == SubscriptionAction::Subscribe {
                entry.acknowledged = false;
                entry.error = Some(reason.clone());
            }
            return AckOutcome::Rejected {
                channel,
                action,
                reason,
            };
        }

        match action {
            SubscriptionAction::Subscribe if entry.desired => {
                entry.acknowledged = true;
                entry.error = None;
                AckOutcome::Acknowledged(channel)
            }
            SubscriptionAction::Unsubscribe if !entry.desired => {
                state.entries.remove(&channel);
                AckOutcome::Unsubscribed(channel)
            }
            _ => AckOutcome::Stale(channel),
        }
    }

    /// Status of the channel a handle refers to.
    #[must_use]
    pub fn status(&self, channel: &Channel) -> Option<SubscriptionStatus> {
        self.state
            .read()
            .entries
            .get(channel)
            .map(|e| e.status(channel))
    }

    /// Status of every tracked channel, including ones awaiting unsubscribe.
    #[must_use]
    pub fn statuses(&self) -> Vec<SubscriptionStatus> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(c, e)| e.status(c))
            .collect()
    }

    /// Number of desired channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.values().filter(|e| e.desired).count()
    }

    /// Whether no channel is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    fn pools() -> Channel {
        Channel::pool_creation("sol")
    }

    fn pairs() -> Channel {
        Channel::pair_update("sol")
    }

    #[test]
    fn add_twice_is_one_subscription() {
        let registry = SubscriptionRegistry::new();
        let (a, first) = registry.acquire(pools(), None);
        let (b, second) = registry.acquire(pools(), None);

        assert_eq!(first, SubscriptionChange::Added);
        assert_eq!(second, SubscriptionChange::Shared);
        assert_eq!(a.channel(), b.channel());
        assert_ne!(a.holder(), b.holder());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status(&pools()).unwrap().holders, 2);
    }

    #[test]
    fn paired_removes_leave_zero() {
        let registry = SubscriptionRegistry::new();
        let a = registry.add(pools());
        let b = registry.add(pools());

        assert_eq!(registry.remove(&a), SubscriptionChange::Retained);
        assert_eq!(registry.remove(&b), SubscriptionChange::Removed);
        assert_eq!(registry.remove(&b), SubscriptionChange::NotHeld);
        assert_eq!(registry.remove(&a), SubscriptionChange::NotHeld);
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_is_sent_once_per_generation() {
        let registry = SubscriptionRegistry::new();
        registry.add(pools());

        assert!(registry.begin_subscribe(&pools(), 1, "r1").is_some());
        assert!(registry.begin_subscribe(&pools(), 1, "r2").is_none());
        assert!(registry.begin_subscribe(&pools(), 2, "r3").is_some());
    }

    #[test]
    fn ack_by_request_id_marks_acknowledged() {
        let registry = SubscriptionRegistry::new();
        registry.add(pools());
        registry.begin_subscribe(&pools(), 1, "r1");

        let outcome = registry.resolve_ack(Some("r1"), None, None);
        assert_eq!(outcome, AckOutcome::Acknowledged(pools()));
        assert!(registry.status(&pools()).unwrap().acknowledged);
        assert!(registry.pending_replay().is_empty());
    }

    #[test]
    fn ack_without_id_falls_back_to_channel_name() {
        let registry = SubscriptionRegistry::new();
        registry.add(pools());
        registry.add(pairs());
        registry.begin_subscribe(&pools(), 1, "r1");
        registry.begin_subscribe(&pairs(), 1, "r2");

        let outcome = registry.resolve_ack(None, Some(ChannelName::PairUpdate), None);
        assert_eq!(outcome, AckOutcome::Acknowledged(pairs()));
        assert_eq!(registry.resolve_ack(Some("zzz"), None, None), AckOutcome::Unmatched);
    }

    #[test]
    fn rejection_is_recorded_on_that_subscription_only() {
        let registry = SubscriptionRegistry::new();
        registry.add(pools());
        registry.add(pairs());
        registry.begin_subscribe(&pools(), 1, "r1");
        registry.begin_subscribe(&pairs(), 1, "r2");

        let outcome = registry.resolve_ack(Some("r1"), None, Some("unauthorized".into()));
        assert!(matches!(outcome, AckOutcome::Rejected { .. }));
        assert_eq!(
            registry.status(&pools()).unwrap().error.as_deref(),
            Some("unauthorized")
        );
        assert!(registry.status(&pairs()).unwrap().error.is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reconnect_resets_acks_but_keeps_desired() {
        let registry = SubscriptionRegistry::new();
        registry.add(pools());
        registry.add(pairs());
        registry.begin_subscribe(&pools(), 1, "r1");
        registry.resolve_ack(Some("r1"), None, None);

        registry.mark_unacknowledged_all();

        assert_eq!(registry.pending_replay(), vec![pools(), pairs()]);
        assert_eq!(registry.desired_set().len(), 2);
    }

    #[test]
    fn unsubscribe_waits_for_ack_before_dropping() {
        let registry = SubscriptionRegistry::new();
        let handle = registry.add(pools());
        registry.begin_subscribe(&pools(), 1, "r1");
        registry.resolve_ack(Some("r1"), None, None);

        assert_eq!(registry.remove(&handle), SubscriptionChange::Removed);
        assert_eq!(registry.begin_unsubscribe(&pools(), 1, "r2"), UnsubscribeStep::Send);
        assert!(registry.status(&pools()).is_some());

        assert_eq!(
            registry.resolve_ack(Some("r2"), None, None),
            AckOutcome::Unsubscribed(pools())
        );
        assert!(registry.status(&pools()).is_none());
    }

    #[test]
    fn unsubscribe_of_unsent_channel_drops_immediately() {
        let registry = SubscriptionRegistry::new();
        let handle = registry.add(pools());
        registry.remove(&handle);

        assert_eq!(registry.begin_unsubscribe(&pools(), 1, "r1"), UnsubscribeStep::Dropped);
        assert!(registry.statuses().is_empty());
    }

    #[test]
    fn readd_before_unsubscribe_ack_keeps_channel() {
        let registry = SubscriptionRegistry::new();
        let handle = registry.add(pools());
        registry.begin_subscribe(&pools(), 1, "r1");
        registry.remove(&handle);
        registry.begin_unsubscribe(&pools(), 1, "r2");

        let (_, change) = registry.acquire(pools(), None);
        assert_eq!(change, SubscriptionChange::Added);
        assert!(registry.begin_subscribe(&pools(), 1, "r3").is_some());

        assert_eq!(registry.resolve_ack(Some("r2"), None, None), AckOutcome::Unmatched);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn token_is_kept_for_replay() {
        let registry = SubscriptionRegistry::new();
        let channel = Channel::wallet_trade("sol", "w1");
        registry.acquire(channel.clone(), AccessToken::new("secret"));

        let token = registry.begin_subscribe(&channel, 1, "r1").unwrap().unwrap();
        assert_eq!(token.expose(), "secret");
        assert_eq!(format!("{token:?}"), "AccessToken([REDACTED])");
    }

    #[test]
    fn blank_token_is_none() {
        assert!(AccessToken::new("  ").is_none());
    }

    #[test]
    fn concurrent_adds_share_one_subscription() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || registry.acquire(pools(), None)));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let added = results
            .iter()
            .filter(|(_, c)| *c == SubscriptionChange::Added)
            .count();
        assert_eq!(added, 1);
        assert_eq!(registry.status(&pools()).unwrap().holders, 10);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(usize),
        Reconnect,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Add),
            any::<usize>().prop_map(Op::Remove),
            Just(Op::Reconnect),
        ]
    }

    fn channel_for(n: u8) -> Channel {
        Channel::pool_creation(&format!("chain{n}"))
    }

    proptest! {
        #[test]
        fn desired_set_matches_refcount_model(ops in proptest::collection::vec(op(), 0..64)) {
            let registry = SubscriptionRegistry::new();
            let mut live: Vec<SubscriptionHandle> = Vec::new();
            let mut model: HashMap<Channel, usize> = HashMap::new();
            let mut generation = 0;

            for op in ops {
                match op {
                    Op::Add(n) => {
                        let handle = registry.add(channel_for(n));
                        *model.entry(handle.channel().clone()).or_default() += 1;
                        live.push(handle);
                    }
                    Op::Remove(i) if !live.is_empty() => {
                        let handle = live.remove(i % live.len());
                        registry.remove(&handle);
                        let count = model.get_mut(handle.channel()).unwrap();
                        *count -= 1;
                    }
                    Op::Remove(_) => {}
                    Op::Reconnect => {
                        registry.mark_unacknowledged_all();
                        generation += 1;
                        let replayed: BTreeSet<_> = registry.pending_replay().into_iter().collect();
                        prop_assert_eq!(&replayed, &registry.desired_set());
                        for channel in &replayed {
                            prop_assert!(registry.begin_subscribe(channel, generation, "r").is_some());
                        }
                    }
                }

                let expected: BTreeSet<_> = model
                    .iter()
                    .filter(|(_, n)| **n > 0)
                    .map(|(c, _)| c.clone())
                    .collect();
                prop_assert_eq!(registry.desired_set(), expected);
            }
        }
    }
}
