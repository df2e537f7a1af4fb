//! Channel lifecycle state machine.
//!
//! ```text
//! disconnected ──begin_connect──▶ (initializing)
//!      ▲                               │
//!      │            AuthChallenge ─────┼──▶ awaiting_auth ⟲ AuthChallenge
//!      │                  Ready ───────┴──▶ ready
//!      └── AuthFailure / Disconnected / reset ◀── any state
//! ```

use crate::types::{ChannelEvent, ChannelStatus, ConnectionState};

/// Process-wide channel state. Mutated only by the connection manager.
///
/// Invariants:
/// - `auth_challenge` is `Some` only while `connection == AwaitingAuth`.
/// - Events are ignored while disconnected and no connect was requested, so
///   nothing reaches `Ready` without going through [`begin_connect`](Self::begin_connect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleState {
    connection: ConnectionState,
    auth_challenge: Option<String>,
    initializing: bool,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            auth_challenge: None,
            initializing: false,
        }
    }
}

impl LifecycleState {
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn auth_challenge(&self) -> Option<&str> {
        self.auth_challenge.as_deref()
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    pub fn is_ready(&self) -> bool {
        self.connection == ConnectionState::Ready
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            connection: self.connection,
            auth_challenge: self.auth_challenge.clone(),
        }
    }

    /// Mark a connect attempt as in flight.
    pub fn begin_connect(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.auth_challenge = None;
        self.initializing = true;
    }

    /// Back to the idle disconnected state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Apply one lifecycle event. Returns `false` when the event was ignored.
    pub fn apply(&mut self, event: &ChannelEvent) -> bool {
        match event {
            ChannelEvent::AuthChallenge(challenge) => {
                if self.is_idle() {
                    return false;
                }
                self.connection = ConnectionState::AwaitingAuth;
                self.auth_challenge = Some(challenge.clone());
            }
            ChannelEvent::Ready => {
                if self.is_idle() {
                    return false;
                }
                self.connection = ConnectionState::Ready;
                self.auth_challenge = None;
                self.initializing = false;
            }
            ChannelEvent::AuthFailure(_) | ChannelEvent::Disconnected(_) => {
                self.reset();
            }
        }
        true
    }

    // Disconnected with no connect in flight.
    fn is_idle(&self) -> bool {
        self.connection == ConnectionState::Disconnected && !self.initializing
    }
}
