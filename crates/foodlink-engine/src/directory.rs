use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use foodlink_types::events::{Audience, ServerEvent};
use foodlink_types::models::Principal;

pub type ConnectionId = Uuid;

/// Registry of live connections and their channel memberships.
///
/// The engine only ever talks to this trait, so the in-process implementation
/// can be replaced by a shared pub/sub backend without touching lifecycle or
/// routing code.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Add a connection for an authenticated principal. The connection is
    /// joined to `user:<id>` and `role:<role>` before this returns.
    async fn register(&self, principal: &Principal) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>);

    /// Drop a connection and every membership it held.
    async fn unregister(&self, conn_id: ConnectionId);

    /// Returns false when the connection is unknown.
    async fn join(&self, conn_id: ConnectionId, audience: Audience) -> bool;

    async fn leave(&self, conn_id: ConnectionId, audience: Audience) -> bool;

    /// Connections currently subscribed to an audience.
    async fn lookup(&self, audience: Audience) -> Vec<ConnectionId>;

    /// Push one event to a single connection, bypassing channels.
    async fn send_to_connection(&self, conn_id: ConnectionId, event: ServerEvent) -> bool;

    /// Fan an event out to the union of the given audiences. A connection
    /// that belongs to several of them still gets one copy. Returns the
    /// number of connections the event was handed to.
    async fn deliver(&self, audiences: &[Audience], event: &ServerEvent) -> usize;
}
