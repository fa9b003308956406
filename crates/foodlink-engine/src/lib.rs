//! Donation lifecycle, notification routing, session checks and discovery.
//!
//! The engine owns every guard. Transport crates (REST, WebSocket) call into
//! [`Engine`] with an authenticated [`Principal`](foodlink_types::models::Principal)
//! and relay whatever typed error comes back.

pub mod accounts;
pub mod directory;
pub mod discovery;
pub mod expiry;
pub mod feedback;
pub mod lifecycle;
pub mod locks;
pub mod router;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use directory::{ChannelDirectory, ConnectionId};
pub use service::{Engine, EngineSettings};
pub use session::SessionGate;
