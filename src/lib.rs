//! Relay that forwards commands from a control plane to remote device
//! agents over persistent WebSocket channels and correlates their replies.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod ingress;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod ws;

pub use error::{DisconnectReason, RelayError, Result};
pub use protocol::Command;
pub use relay::Relay;
