use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;
pub mod pubsub;
pub mod typing;

/// Unique identifier for a registered WebSocket connection.
///
/// Each connection gets a fresh id when it registers, allowing precise
/// cleanup when the transport closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

struct ConnectionEntry {
    user_id: Uuid,
    sender: UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    // conversation_id -> member connections
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
    // user_id -> all of that user's connections (multi-tab)
    users: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl RegistryInner {
    /// Remove a connection from every index. Returns the rooms it had
    /// joined so the caller can tear down per-room state (typing timers).
    fn remove(&mut self, conn: ConnectionId) -> Vec<Uuid> {
        let Some(entry) = self.connections.remove(&conn) else {
            return Vec::new();
        };
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        if let Some(conns) = self.users.get_mut(&entry.user_id) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.users.remove(&entry.user_id);
            }
        }
        entry.rooms.into_iter().collect()
    }
}

/// Room router for WebSocket fan-out.
///
/// Owns the three mappings that make up the realtime surface: connection
/// bookkeeping, room membership (conversation id -> connections) and the
/// per-user connection index used for targeted pushes. Rooms are created
/// implicitly on first join and removed when the last member leaves.
///
/// Delivery is at-most-once and fire-and-forget: sends go through an
/// unbounded channel per connection, a dead sender is unregistered
/// silently, and the router never retries or duplicates an event.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new connection to an authenticated user id.
    ///
    /// Returns the connection id and the receiving half of the
    /// connection's outbound channel; the session task forwards received
    /// payloads to the transport.
    pub async fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let conn = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.connections.insert(
            conn,
            ConnectionEntry {
                user_id,
                sender: tx,
                rooms: HashSet::new(),
            },
        );
        guard.users.entry(user_id).or_default().insert(conn);

        tracing::debug!(
            %user_id,
            total = guard.connections.len(),
            "registered websocket connection"
        );

        (conn, rx)
    }

    /// Add a connection to a room. Idempotent: joining twice leaves the
    /// member set unchanged. Unknown connections are ignored.
    pub async fn join(&self, room: Uuid, conn: ConnectionId) {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.connections.get_mut(&conn) else {
            return;
        };
        entry.rooms.insert(room);
        guard.rooms.entry(room).or_default().insert(conn);
    }

    /// Remove a connection from a room. No-op if it was not a member.
    pub async fn leave(&self, room: Uuid, conn: ConnectionId) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.connections.get_mut(&conn) {
            entry.rooms.remove(&room);
        }
        if let Some(members) = guard.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                guard.rooms.remove(&room);
            }
        }
    }

    /// Whether a connection is currently a member of a room.
    pub async fn in_room(&self, room: Uuid, conn: ConnectionId) -> bool {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(&room)
            .map(|members| members.contains(&conn))
            .unwrap_or(false)
    }

    /// Deliver a payload to every current member of a room.
    ///
    /// Late joiners receive nothing retroactively: membership is evaluated
    /// at call time.
    pub async fn broadcast(&self, room: Uuid, payload: &str) {
        self.fan_out(room, None, payload).await;
    }

    /// Like [`broadcast`], excluding the originating connection. Used for
    /// typing indicators, where echoing the event back is just noise.
    ///
    /// [`broadcast`]: ConnectionRegistry::broadcast
    pub async fn broadcast_except(&self, room: Uuid, except: ConnectionId, payload: &str) {
        self.fan_out(room, Some(except), payload).await;
    }

    async fn fan_out(&self, room: Uuid, except: Option<ConnectionId>, payload: &str) {
        let mut guard = self.inner.write().await;
        let Some(members) = guard.rooms.get(&room) else {
            return;
        };
        let members: Vec<ConnectionId> = members.iter().copied().collect();

        let mut dead = Vec::new();
        for conn in members {
            if Some(conn) == except {
                continue;
            }
            if let Some(entry) = guard.connections.get(&conn) {
                if entry.sender.send(payload.to_string()).is_err() {
                    dead.push(conn);
                }
            }
        }
        for conn in dead {
            guard.remove(conn);
        }
    }

    /// Deliver a payload to every connection bound to a user id,
    /// regardless of room membership (notification pushes, unread-count
    /// invalidation across tabs).
    pub async fn notify_user(&self, user_id: Uuid, payload: &str) {
        self.notify_user_filtered(user_id, None, payload).await;
    }

    /// Deliver to the user's connections that are *not* members of the
    /// given room. A room broadcast followed by this call reaches every
    /// interested connection exactly once.
    pub async fn notify_user_except_room(&self, user_id: Uuid, room: Uuid, payload: &str) {
        self.notify_user_filtered(user_id, Some(room), payload).await;
    }

    async fn notify_user_filtered(&self, user_id: Uuid, skip_room: Option<Uuid>, payload: &str) {
        let mut guard = self.inner.write().await;
        let Some(conns) = guard.users.get(&user_id) else {
            return;
        };
        let conns: Vec<ConnectionId> = conns.iter().copied().collect();

        let mut dead = Vec::new();
        for conn in conns {
            if let Some(entry) = guard.connections.get(&conn) {
                if let Some(room) = skip_room {
                    if entry.rooms.contains(&room) {
                        continue;
                    }
                }
                if entry.sender.send(payload.to_string()).is_err() {
                    dead.push(conn);
                }
            }
        }
        for conn in dead {
            guard.remove(conn);
        }
    }

    /// Deliver a payload to one specific connection (acks, error frames).
    /// Returns false if the connection is gone.
    pub async fn send_to(&self, conn: ConnectionId, payload: &str) -> bool {
        let guard = self.inner.read().await;
        guard
            .connections
            .get(&conn)
            .map(|entry| entry.sender.send(payload.to_string()).is_ok())
            .unwrap_or(false)
    }

    /// Remove a connection from every room and index. Returns the rooms
    /// it had joined so the session can stop its typing timers.
    pub async fn unregister(&self, conn: ConnectionId) -> Vec<Uuid> {
        let mut guard = self.inner.write().await;
        let rooms = guard.remove(conn);
        tracing::debug!(
            remaining = guard.connections.len(),
            "unregistered websocket connection"
        );
        rooms
    }

    /// Member count for a room (metrics, tests).
    pub async fn room_size(&self, room: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.rooms.get(&room).map(|m| m.len()).unwrap_or(0)
    }

    /// Number of live connections for a user (metrics, tests).
    pub async fn user_connections(&self, user_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.users.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let (conn, _rx) = registry.register(Uuid::new_v4()).await;

        registry.join(room, conn).await;
        registry.join(room, conn).await;

        assert_eq!(registry.room_size(room).await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_current_members_only() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();

        let (member, mut member_rx) = registry.register(Uuid::new_v4()).await;
        let (_outsider, mut outsider_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, member).await;

        registry.broadcast(room, "hello").await;

        assert_eq!(member_rx.recv().await.unwrap(), "hello");
        assert!(outsider_rx.try_recv().is_err());

        // Late joiner sees nothing retroactively.
        let (late, mut late_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, late).await;
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_from_every_room() {
        let registry = ConnectionRegistry::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();

        let (conn, mut rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room_a, conn).await;
        registry.join(room_b, conn).await;

        let mut rooms = registry.unregister(conn).await;
        rooms.sort();
        let mut expected = vec![room_a, room_b];
        expected.sort();
        assert_eq!(rooms, expected);

        registry.broadcast(room_a, "a").await;
        registry.broadcast(room_b, "b").await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_size(room_a).await, 0);
        assert_eq!(registry.room_size(room_b).await, 0);
    }

    #[tokio::test]
    async fn notify_user_reaches_all_tabs() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (_tab1, mut rx1) = registry.register(user).await;
        let (_tab2, mut rx2) = registry.register(user).await;

        registry.notify_user(user, "ping").await;

        assert_eq!(rx1.recv().await.unwrap(), "ping");
        assert_eq!(rx2.recv().await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn notify_user_except_room_skips_subscribed_tab() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();

        let (in_room, mut in_room_rx) = registry.register(user).await;
        let (_elsewhere, mut elsewhere_rx) = registry.register(user).await;
        registry.join(room, in_room).await;

        registry.notify_user_except_room(user, room, "unread").await;

        assert!(in_room_rx.try_recv().is_err());
        assert_eq!(elsewhere_rx.recv().await.unwrap(), "unread");
    }

    #[tokio::test]
    async fn broadcast_except_suppresses_origin_echo() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();

        let (origin, mut origin_rx) = registry.register(Uuid::new_v4()).await;
        let (peer, mut peer_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, origin).await;
        registry.join(room, peer).await;

        registry.broadcast_except(room, origin, "typing").await;

        assert!(origin_rx.try_recv().is_err());
        assert_eq!(peer_rx.recv().await.unwrap(), "typing");
    }

    #[tokio::test]
    async fn dead_receiver_is_dropped_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (conn, rx) = registry.register(user).await;
        registry.join(room, conn).await;
        drop(rx);

        registry.broadcast(room, "gone").await;

        assert_eq!(registry.room_size(room).await, 0);
        assert_eq!(registry.user_connections(user).await, 0);
    }

    #[tokio::test]
    async fn leave_is_noop_when_absent() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::new_v4();
        let (conn, _rx) = registry.register(Uuid::new_v4()).await;

        registry.leave(room, conn).await;
        assert_eq!(registry.room_size(room).await, 0);
    }
}
