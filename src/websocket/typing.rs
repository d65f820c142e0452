//! Typing indicator state machine.
//!
//! Per (conversation, user): `idle -> typing -> idle`. A `typing=true`
//! frame broadcasts the state to the other room members and (re)arms a
//! 3-second expiry timer; the transition back to idle happens on an
//! explicit `typing=false` frame or when the timer fires, so peers never
//! see a typing indicator stuck on after the typist goes silent. No
//! durable state is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::websocket::events::{self, ServerEvent};
use crate::websocket::{ConnectionId, ConnectionRegistry};

/// Silence window after which an implicit `typing=false` is broadcast.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

struct TypingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Tracks armed expiry timers, keyed by (conversation, user).
///
/// Timers live on the instance the typist is connected to; the resulting
/// broadcasts travel the same fan-out path as every other event.
#[derive(Default, Clone)]
pub struct TypingTracker {
    timers: Arc<Mutex<HashMap<(Uuid, Uuid), TypingTimer>>>,
    generation: Arc<AtomicU64>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client reported `typing=true`: broadcast to the other members and
    /// (re)arm the expiry timer for this (conversation, user).
    pub async fn started(
        &self,
        registry: &ConnectionRegistry,
        redis: &redis::Client,
        origin: ConnectionId,
        conversation_id: Uuid,
        user_id: Uuid,
    ) {
        let event = ServerEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: true,
        };
        events::broadcast_event_except(registry, redis, conversation_id, origin, &event).await;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.remove(&(conversation_id, user_id)) {
            old.handle.abort();
        }

        let tracker = self.clone();
        let registry = registry.clone();
        let redis = redis.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;

            // Only fire if this timer is still the armed one; a newer
            // keystroke may have replaced it between wake-up and lock.
            {
                let mut timers = tracker.timers.lock().await;
                let still_armed = timers
                    .get(&(conversation_id, user_id))
                    .map(|timer| timer.generation == generation)
                    .unwrap_or(false);
                if !still_armed {
                    return;
                }
                timers.remove(&(conversation_id, user_id));
            }

            let event = ServerEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing: false,
            };
            events::broadcast_event_except(&registry, &redis, conversation_id, origin, &event)
                .await;
        });

        timers.insert(
            (conversation_id, user_id),
            TypingTimer { generation, handle },
        );
    }

    /// Client reported `typing=false`: cancel the timer and broadcast the
    /// idle state immediately.
    pub async fn stopped(
        &self,
        registry: &ConnectionRegistry,
        redis: &redis::Client,
        origin: ConnectionId,
        conversation_id: Uuid,
        user_id: Uuid,
    ) {
        self.cancel(conversation_id, user_id).await;
        let event = ServerEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: false,
        };
        events::broadcast_event_except(registry, redis, conversation_id, origin, &event).await;
    }

    /// The user left the room (or their connection closed). If a timer was
    /// armed, clear it and let the remaining members see the idle state.
    pub async fn room_left(
        &self,
        registry: &ConnectionRegistry,
        redis: &redis::Client,
        conversation_id: Uuid,
        user_id: Uuid,
    ) {
        if self.cancel(conversation_id, user_id).await {
            let event = ServerEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing: false,
            };
            events::broadcast_event(registry, redis, conversation_id, &event).await;
        }
    }

    /// Transport closed: clear timers for every room the connection had
    /// joined.
    pub async fn connection_closed(
        &self,
        registry: &ConnectionRegistry,
        redis: &redis::Client,
        rooms: &[Uuid],
        user_id: Uuid,
    ) {
        for room in rooms {
            self.room_left(registry, redis, *room, user_id).await;
        }
    }

    async fn cancel(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.remove(&(conversation_id, user_id)) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_redis() -> redis::Client {
        // Never connected in these tests: publish failures are swallowed
        // by the fan-out helpers.
        redis::Client::open("redis://127.0.0.1:1/").unwrap()
    }

    async fn typing_frame(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> (bool, Uuid) {
        let raw = rx.recv().await.expect("expected a typing frame");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "user-typing");
        (
            value["is_typing"].as_bool().unwrap(),
            value["user_id"].as_str().unwrap().parse().unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn silence_yields_implicit_stop() {
        let registry = ConnectionRegistry::new();
        let redis = test_redis();
        let tracker = TypingTracker::new();
        let room = Uuid::new_v4();
        let typist = Uuid::new_v4();

        let (typist_conn, mut typist_rx) = registry.register(typist).await;
        let (peer_conn, mut peer_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, typist_conn).await;
        registry.join(room, peer_conn).await;

        tracker
            .started(&registry, &redis, typist_conn, room, typist)
            .await;
        assert_eq!(typing_frame(&mut peer_rx).await, (true, typist));

        // No further client input: the expiry timer produces the stop.
        tokio::time::sleep(TYPING_EXPIRY + Duration::from_millis(100)).await;
        assert_eq!(typing_frame(&mut peer_rx).await, (false, typist));

        // The typist never hears their own echo.
        assert!(typist_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_timer() {
        let registry = ConnectionRegistry::new();
        let redis = test_redis();
        let tracker = TypingTracker::new();
        let room = Uuid::new_v4();
        let typist = Uuid::new_v4();

        let (typist_conn, _typist_rx) = registry.register(typist).await;
        let (peer_conn, mut peer_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, typist_conn).await;
        registry.join(room, peer_conn).await;

        tracker
            .started(&registry, &redis, typist_conn, room, typist)
            .await;
        tracker
            .stopped(&registry, &redis, typist_conn, room, typist)
            .await;

        assert_eq!(typing_frame(&mut peer_rx).await, (true, typist));
        assert_eq!(typing_frame(&mut peer_rx).await, (false, typist));

        // The aborted timer must not produce a second stop.
        tokio::time::sleep(TYPING_EXPIRY * 2).await;
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_rearms_timer() {
        let registry = ConnectionRegistry::new();
        let redis = test_redis();
        let tracker = TypingTracker::new();
        let room = Uuid::new_v4();
        let typist = Uuid::new_v4();

        let (typist_conn, _typist_rx) = registry.register(typist).await;
        let (peer_conn, mut peer_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, typist_conn).await;
        registry.join(room, peer_conn).await;

        tracker
            .started(&registry, &redis, typist_conn, room, typist)
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        tracker
            .started(&registry, &redis, typist_conn, room, typist)
            .await;

        assert_eq!(typing_frame(&mut peer_rx).await, (true, typist));
        assert_eq!(typing_frame(&mut peer_rx).await, (true, typist));

        // Four seconds after the first keystroke, two after the second:
        // the re-armed timer has not fired yet.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(peer_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(typing_frame(&mut peer_rx).await, (false, typist));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_armed_timer() {
        let registry = ConnectionRegistry::new();
        let redis = test_redis();
        let tracker = TypingTracker::new();
        let room = Uuid::new_v4();
        let typist = Uuid::new_v4();

        let (typist_conn, _typist_rx) = registry.register(typist).await;
        let (peer_conn, mut peer_rx) = registry.register(Uuid::new_v4()).await;
        registry.join(room, typist_conn).await;
        registry.join(room, peer_conn).await;

        tracker
            .started(&registry, &redis, typist_conn, room, typist)
            .await;
        assert_eq!(typing_frame(&mut peer_rx).await, (true, typist));

        let rooms = registry.unregister(typist_conn).await;
        tracker
            .connection_closed(&registry, &redis, &rooms, typist)
            .await;
        assert_eq!(typing_frame(&mut peer_rx).await, (false, typist));

        tokio::time::sleep(TYPING_EXPIRY * 2).await;
        assert!(peer_rx.try_recv().is_err());
    }
}
