//! Event iteration primitive.

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

use super::client::ClientError;
use crate::application::ports::{EventHandler, HandlerError};
use crate::domain::connection::ConnectionState;
use crate::domain::events::FeedEvent;
use crate::domain::stats::{StatCounter, StatsHandle};
use crate::infrastructure::dispatch::{DispatchRouter, HandlerId};
use crate::infrastructure::gmgn::FatalSlot;

/// Catch-all handler feeding one [`EventStream`].
struct Listener {
    tx: mpsc::Sender<FeedEvent>,
    stats: StatsHandle,
}

impl EventHandler for Listener {
    fn handle(&self, event: &FeedEvent) -> Result<(), HandlerError> {
        match self.tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.stats.increment(StatCounter::ListenerDropped);
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "event-stream"
    }
}

/// Typed events in arrival order.
///
/// Ends after `close()`, or with one [`ClientError::ExhaustedRetries`] when
/// reconnecting gave up. Events buffered before the end are still yielded.
/// A full buffer drops new events and counts them in `listener_dropped`.
pub struct EventStream {
    rx: mpsc::Receiver<FeedEvent>,
    state: watch::Receiver<ConnectionState>,
    fatal: FatalSlot,
    router: Arc<DispatchRouter>,
    handler: HandlerId,
    done: bool,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffered", &self.rx.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    pub(super) fn open(
        router: Arc<DispatchRouter>,
        stats: StatsHandle,
        state: watch::Receiver<ConnectionState>,
        fatal: FatalSlot,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handler = router.register_all(Arc::new(Listener { tx, stats }));
        Self {
            rx,
            state,
            fatal,
            router,
            handler,
            done: false,
        }
    }

    /// Next event, `None` once the client is closed.
    pub async fn next(&mut self) -> Option<Result<FeedEvent, ClientError>> {
        if self.done {
            return None;
        }

        tokio::select! {
            biased;

            event = self.rx.recv() => {
                if let Some(event) = event {
                    return Some(Ok(event));
                }
            }
            _ = self.state.wait_for(|s| s.is_closed()) => {}
        }

        if let Ok(event) = self.rx.try_recv() {
            return Some(Ok(event));
        }
        self.done = true;
        self.router.unregister_all(self.handler);
        self.fatal.lock().clone().map(|e| Err(e.into()))
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<FeedEvent, ClientError>> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.done {
            self.router.unregister_all(self.handler);
        }
    }
}
