use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    channel::{Channel, Connector},
    state::LifecycleState,
    types::{ChannelEvent, ChannelStatus},
};

/// Capacity of the per-connection lifecycle event queue.
const EVENT_BUFFER: usize = 32;

/// Owns the single outbound channel connection and its lifecycle state.
///
/// Constructed once at process start and shared as `Arc<ConnectionManager>`.
/// Only the manager mutates connection state; callers get snapshots.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: LifecycleState,
    active: Option<Arc<dyn Channel>>,
    /// Bumped whenever the active connection is replaced or torn down, so
    /// late events from an old connection are discarded.
    generation: u64,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector + 'static) -> Arc<Self> {
        Arc::new(Self {
            connector: Box::new(connector),
            inner: Mutex::new(Inner {
                state: LifecycleState::default(),
                active: None,
                generation: 0,
            }),
        })
    }

    /// Start a connect attempt unless one is pointless.
    ///
    /// No-op when the current connection is ready or an attempt is already
    /// initializing. Otherwise a fresh connection object replaces any stale
    /// one and connects in the background. Returns `true` when an attempt
    /// was started. Must be called from within a Tokio runtime.
    pub fn request_connect(self: &Arc<Self>) -> bool {
        let (channel, stale, generation) = {
            let mut inner = self.lock();
            if inner.active.is_some() && inner.state.is_ready() {
                debug!("connect requested but channel already ready");
                return false;
            }
            if inner.state.is_initializing() {
                debug!("connect requested but an attempt is already initializing");
                return false;
            }

            inner.generation += 1;
            let channel = self.connector.create();
            let stale = inner.active.replace(Arc::clone(&channel));
            inner.state.begin_connect();
            (channel, stale, inner.generation)
        };

        info!(channel = %channel.name(), generation, "channel connect requested");

        if let Some(old) = stale {
            tokio::spawn(async move {
                if let Err(e) = old.disconnect().await {
                    warn!(channel = %old.name(), error = %e, "error while discarding stale connection");
                }
            });
        }

        let (tx, mut rx) = mpsc::channel::<ChannelEvent>(EVENT_BUFFER);

        // Lifecycle events are applied one at a time, in arrival order.
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match weak.upgrade() {
                    Some(manager) => manager.handle_event(generation, event),
                    None => break,
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Err(e) = channel.connect(tx).await {
                warn!(channel = %channel.name(), error = %e, "channel connect failed");
                if let Some(manager) = weak.upgrade() {
                    manager.handle_event(
                        generation,
                        ChannelEvent::Disconnected(format!("connect failed: {e}")),
                    );
                }
            }
        });

        true
    }

    /// Snapshot of the current connection state. No side effects.
    pub fn status(&self) -> ChannelStatus {
        self.lock().state.status()
    }

    pub fn is_ready(&self) -> bool {
        self.lock().state.is_ready()
    }

    /// Tear down the active connection (if any) and reset to disconnected.
    ///
    /// Idempotent; safe to call with no active connection.
    pub async fn disconnect(&self) {
        let active = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.state.reset();
            inner.active.take()
        };

        match active {
            Some(channel) => {
                if let Err(e) = channel.disconnect().await {
                    warn!(channel = %channel.name(), error = %e, "error while disconnecting channel");
                }
                info!(channel = %channel.name(), "channel disconnected");
            }
            None => debug!("disconnect requested with no active connection"),
        }
    }

    /// The active connection, but only while it is ready.
    ///
    /// Crate-private: sends must go through the send gateway.
    pub(crate) fn ready_channel(&self) -> Option<Arc<dyn Channel>> {
        let inner = self.lock();
        if inner.state.is_ready() {
            inner.active.clone()
        } else {
            None
        }
    }

    fn handle_event(&self, generation: u64, event: ChannelEvent) {
        let mut inner = self.lock();
        if generation != inner.generation {
            debug!(generation, current = inner.generation, ?event, "ignoring event from stale connection");
            return;
        }

        let before = inner.state.connection();
        if !inner.state.apply(&event) {
            debug!(?event, "lifecycle event ignored in current state");
            return;
        }
        let after = inner.state.connection();

        match &event {
            ChannelEvent::AuthChallenge(_) => info!(from = %before, "channel awaiting authentication"),
            ChannelEvent::Ready => info!(from = %before, "channel ready"),
            ChannelEvent::AuthFailure(reason) => warn!(%reason, "channel authentication failed"),
            ChannelEvent::Disconnected(reason) => warn!(from = %before, to = %after, %reason, "channel disconnected"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
