use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use foodlink_engine::directory::{ChannelDirectory, ConnectionId};
use foodlink_types::events::{Audience, ServerEvent};
use foodlink_types::models::Principal;

struct ConnectionEntry {
    principal: Principal,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<Audience>,
}

/// In-process directory of live connections and room memberships.
///
/// Lock order is always `connections` then `rooms`.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> principal, outbound channel, joined rooms
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,

    /// audience -> member connections
    rooms: RwLock<HashMap<Audience, HashSet<ConnectionId>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Rooms a connection currently belongs to.
    pub async fn memberships(&self, conn_id: ConnectionId) -> HashSet<Audience> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelDirectory for Dispatcher {
    async fn register(&self, principal: &Principal) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let auto = [
            Audience::User(principal.user_id),
            Audience::Role(principal.role),
        ];

        let mut connections = self.inner.connections.write().await;
        let mut rooms = self.inner.rooms.write().await;
        for audience in auto {
            rooms.entry(audience).or_default().insert(conn_id);
        }
        connections.insert(
            conn_id,
            ConnectionEntry {
                principal: principal.clone(),
                tx,
                rooms: auto.into_iter().collect(),
            },
        );
        (conn_id, rx)
    }

    async fn unregister(&self, conn_id: ConnectionId) {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.remove(&conn_id) else {
            return;
        };

        trace!(
            "Dropping {} from {} room(s)",
            entry.principal.name,
            entry.rooms.len()
        );
        let mut rooms = self.inner.rooms.write().await;
        for audience in entry.rooms {
            if let Some(members) = rooms.get_mut(&audience) {
                members.remove(&conn_id);
                if members.is_empty() {
                    rooms.remove(&audience);
                }
            }
        }
    }

    async fn join(&self, conn_id: ConnectionId, audience: Audience) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&conn_id) else {
            return false;
        };
        entry.rooms.insert(audience);
        self.inner
            .rooms
            .write()
            .await
            .entry(audience)
            .or_default()
            .insert(conn_id);
        true
    }

    async fn leave(&self, conn_id: ConnectionId, audience: Audience) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.remove(&audience) {
            return false;
        }

        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&audience) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&audience);
            }
        }
        true
    }

    async fn lookup(&self, audience: Audience) -> Vec<ConnectionId> {
        self.inner
            .rooms
            .read()
            .await
            .get(&audience)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn send_to_connection(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    async fn deliver(&self, audiences: &[Audience], event: &ServerEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let targets: HashSet<ConnectionId> = {
            let rooms = self.inner.rooms.read().await;
            audiences
                .iter()
                .filter_map(|audience| rooms.get(audience))
                .flatten()
                .copied()
                .collect()
        };

        let mut delivered = 0;
        for conn_id in targets {
            // A closed receiver means the socket is going away; skip it.
            if let Some(entry) = connections.get(&conn_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        trace!("Delivered to {} connection(s)", delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodlink_types::models::Role;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            name: role.to_string(),
            role,
            verified: true,
        }
    }

    fn ping() -> ServerEvent {
        ServerEvent::Error {
            code: "test".into(),
            message: "ping".into(),
        }
    }

    #[tokio::test]
    async fn register_joins_own_user_and_role_rooms() {
        let dispatcher = Dispatcher::new();
        let admin = principal(Role::Admin);
        let (conn, _rx) = dispatcher.register(&admin).await;

        assert_eq!(
            dispatcher.lookup(Audience::User(admin.user_id)).await,
            vec![conn]
        );
        assert_eq!(dispatcher.lookup(Audience::Role(Role::Admin)).await, vec![conn]);
        assert!(dispatcher.lookup(Audience::Role(Role::Receiver)).await.is_empty());
    }

    #[tokio::test]
    async fn overlapping_audiences_deliver_once() {
        let dispatcher = Dispatcher::new();
        let admin = principal(Role::Admin);
        let (conn, mut rx) = dispatcher.register(&admin).await;
        let post = Audience::Post(Uuid::new_v4());
        assert!(dispatcher.join(conn, post).await);

        let n = dispatcher
            .deliver(
                &[Audience::User(admin.user_id), post, Audience::Role(Role::Admin)],
                &ping(),
            )
            .await;
        assert_eq!(n, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_drops_every_membership() {
        let dispatcher = Dispatcher::new();
        let receiver = principal(Role::Receiver);
        let (conn, _rx) = dispatcher.register(&receiver).await;
        let post = Audience::Post(Uuid::new_v4());
        dispatcher.join(conn, post).await;

        dispatcher.unregister(conn).await;
        assert!(dispatcher.lookup(post).await.is_empty());
        assert!(dispatcher.lookup(Audience::Role(Role::Receiver)).await.is_empty());
        assert_eq!(dispatcher.connection_count().await, 0);
        assert!(!dispatcher.join(conn, post).await);
        assert_eq!(dispatcher.deliver(&[post], &ping()).await, 0);
    }

    #[tokio::test]
    async fn leave_only_affects_that_room() {
        let dispatcher = Dispatcher::new();
        let donor = principal(Role::Donor);
        let (conn, _rx) = dispatcher.register(&donor).await;
        let a = Audience::Post(Uuid::new_v4());
        let b = Audience::Post(Uuid::new_v4());
        dispatcher.join(conn, a).await;
        dispatcher.join(conn, b).await;

        assert!(dispatcher.leave(conn, a).await);
        assert!(!dispatcher.leave(conn, a).await);
        assert!(dispatcher.lookup(a).await.is_empty());
        assert_eq!(dispatcher.lookup(b).await, vec![conn]);
        assert!(dispatcher.memberships(conn).await.contains(&b));
    }

    #[tokio::test]
    async fn two_tabs_of_one_user_both_receive() {
        let dispatcher = Dispatcher::new();
        let donor = principal(Role::Donor);
        let (_c1, mut rx1) = dispatcher.register(&donor).await;
        let (_c2, mut rx2) = dispatcher.register(&donor).await;

        let n = dispatcher
            .deliver(&[Audience::User(donor.user_id)], &ping())
            .await;
        assert_eq!(n, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
