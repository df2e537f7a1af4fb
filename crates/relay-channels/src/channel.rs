use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::ChannelError,
    types::{ChannelEvent, OutboundMessage},
};

/// One physical connection to the outbound messaging service.
///
/// A connection object is used for a single connect attempt and its
/// lifetime; reconnecting creates a fresh object through a [`Connector`].
/// Implementations must be `Send + Sync` so the manager and the send
/// gateway can share them across Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier (e.g. `"whatsapp"`).
    fn name(&self) -> &str;

    /// Begin connecting. Lifecycle events are reported on `events` for as
    /// long as the connection lives; the sender is dropped when it ends.
    ///
    /// Returning `Err` means the attempt failed before any event could be
    /// produced.
    async fn connect(&self, events: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError>;

    /// Deliver a single message.
    ///
    /// Only the [`SendGateway`](crate::gateway::SendGateway) calls this, and
    /// never concurrently.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Tear the connection down and stop emitting events.
    async fn disconnect(&self) -> Result<(), ChannelError>;
}

/// Factory for fresh connection objects.
pub trait Connector: Send + Sync {
    fn create(&self) -> Arc<dyn Channel>;
}

impl<F> Connector for F
where
    F: Fn() -> Arc<dyn Channel> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Channel> {
        self()
    }
}
