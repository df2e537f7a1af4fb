//! Serialized send gateway.
//!
//! The channel is one stateful session; two sends in flight at once would
//! race its per-message protocol. Every send is therefore pushed onto a
//! single FIFO queue drained by one worker task, which awaits each send to
//! completion before starting the next.

use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{error::ChannelError, manager::ConnectionManager, types::OutboundMessage};

/// Status snapshot for monitoring clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub ready: bool,
    pub auth_challenge: Option<String>,
    pub sending: bool,
    pub queue_depth: usize,
}

/// The only path to the channel's send capability.
pub struct SendGateway {
    manager: Arc<ConnectionManager>,
    queue: mpsc::UnboundedSender<QueuedSend>,
    depth: Arc<AtomicUsize>,
}

struct QueuedSend {
    msg: OutboundMessage,
    reply: oneshot::Sender<Result<(), ChannelError>>,
    slot: DepthSlot,
}

/// One unit of queue depth, released exactly once when dropped.
struct DepthSlot(Arc<AtomicUsize>);

impl DepthSlot {
    fn acquire(depth: &Arc<AtomicUsize>) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(depth))
    }
}

impl Drop for DepthSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a submitted send.
///
/// Dropping it does not cancel the send; the worker still runs it and
/// releases its queue slot.
pub struct PendingSend {
    rx: oneshot::Receiver<Result<(), ChannelError>>,
}

impl PendingSend {
    pub async fn wait(self) -> Result<(), ChannelError> {
        self.rx.await.unwrap_or(Err(ChannelError::GatewayClosed))
    }
}

impl SendGateway {
    /// Create the gateway and spawn its worker. Must be called from within
    /// a Tokio runtime.
    pub fn spawn(manager: Arc<ConnectionManager>, send_timeout: Duration) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(Arc::clone(&manager), rx, send_timeout));
        Arc::new(Self {
            manager,
            queue,
            depth: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Enqueue a send without waiting for it.
    ///
    /// Fails immediately with [`ChannelError::NotReady`] when the channel is
    /// not ready; such calls never occupy a queue slot.
    pub fn submit(&self, msg: OutboundMessage) -> Result<PendingSend, ChannelError> {
        if !self.manager.is_ready() {
            return Err(ChannelError::NotReady);
        }

        let slot = DepthSlot::acquire(&self.depth);
        let (reply, rx) = oneshot::channel();
        // On a closed queue the rejected item is dropped here, releasing its slot.
        self.queue
            .send(QueuedSend { msg, reply, slot })
            .map_err(|_| ChannelError::GatewayClosed)?;

        Ok(PendingSend { rx })
    }

    /// Enqueue a send and wait for its result.
    pub async fn send(&self, msg: OutboundMessage) -> Result<(), ChannelError> {
        self.submit(msg)?.wait().await
    }

    /// Sends submitted but not yet resolved.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn status(&self) -> GatewayStatus {
        let channel = self.manager.status();
        let queue_depth = self.queue_depth();
        GatewayStatus {
            ready: channel.is_ready(),
            auth_challenge: channel.auth_challenge,
            sending: queue_depth > 0,
            queue_depth,
        }
    }
}

async fn run_worker(
    manager: Arc<ConnectionManager>,
    mut rx: mpsc::UnboundedReceiver<QueuedSend>,
    send_timeout: Duration,
) {
    while let Some(QueuedSend { msg, reply, slot }) = rx.recv().await {
        let result = deliver(&manager, &msg, send_timeout).await;
        if let Err(ref e) = result {
            warn!(recipient = %msg.recipient, error = %e, "send failed");
        } else {
            debug!(recipient = %msg.recipient, "send delivered");
        }

        // Release the slot before replying so a caller that observes its
        // result also observes the decremented depth.
        drop(slot);
        // The caller may have stopped waiting; the send still counted.
        let _ = reply.send(result);
    }
    debug!("send gateway worker stopped");
}

async fn deliver(
    manager: &ConnectionManager,
    msg: &OutboundMessage,
    send_timeout: Duration,
) -> Result<(), ChannelError> {
    // Readiness can change while the message waits its turn.
    let channel = manager.ready_channel().ok_or(ChannelError::NotReady)?;

    let attempt = AssertUnwindSafe(channel.send(msg)).catch_unwind();
    match tokio::time::timeout(send_timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => {
            error!(channel = %channel.name(), "channel panicked during send");
            Err(ChannelError::SendFailed("channel panicked during send".to_string()))
        }
        Err(_) => Err(ChannelError::Timeout {
            ms: send_timeout.as_millis() as u64,
        }),
    }
}
