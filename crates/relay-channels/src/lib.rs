//! `relay-channels` — the outbound channel and everything that guards it.
//!
//! A single stateful chat session (the [`Channel`]) is owned by the
//! [`ConnectionManager`], which drives its lifecycle from explicit
//! [`ChannelEvent`]s. All sends go through the [`SendGateway`], which runs
//! them one at a time in submission order.

pub mod channel;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod state;
pub mod types;
pub mod whatsapp;

pub use channel::{Channel, Connector};
pub use error::ChannelError;
pub use gateway::{GatewayStatus, PendingSend, SendGateway};
pub use manager::ConnectionManager;
pub use state::LifecycleState;
pub use types::{ChannelEvent, ChannelStatus, ConnectionState, OutboundMessage};
pub use whatsapp::WhatsAppBridge;
