use thiserror::Error;

/// Errors that can occur within the channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel is not in the ready state; nothing was sent.
    #[error("Channel not ready")]
    NotReady,

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The send gateway worker has stopped and no longer accepts work.
    #[error("Send gateway closed")]
    GatewayClosed,
}
