use serde::{Deserialize, Serialize};

/// Connection state of the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No usable session. Only a connect request leaves this state.
    Disconnected,

    /// The session is waiting for the operator to complete pairing.
    AwaitingAuth,

    /// Fully connected and able to send.
    Ready,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::AwaitingAuth => "awaiting_auth",
            ConnectionState::Ready => "ready",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle events emitted by a channel connection.
///
/// Each event maps to exactly one transition in
/// [`LifecycleState::apply`](crate::state::LifecycleState::apply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A pairing challenge (e.g. QR payload) was issued or reissued.
    AuthChallenge(String),

    /// The session is authenticated and can send.
    Ready,

    /// Pairing was rejected; the attempt is over.
    AuthFailure(String),

    /// The session was lost after (or while) connecting.
    Disconnected(String),
}

/// Point-in-time view of the channel, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub connection: ConnectionState,
    pub auth_challenge: Option<String>,
}

impl ChannelStatus {
    pub fn is_ready(&self) -> bool {
        self.connection == ConnectionState::Ready
    }
}

/// A message to be delivered through the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Normalized recipient identifier (digits only for phone numbers).
    pub recipient: String,

    /// Text body. Used as the caption when `media_url` is set.
    pub body: Option<String>,

    /// Optional media reference attached to the message.
    pub media_url: Option<String>,
}

impl OutboundMessage {
    pub fn text(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: Some(body.into()),
            media_url: None,
        }
    }
}
