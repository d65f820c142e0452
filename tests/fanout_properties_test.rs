//! Fan-out behavior of the room router and typing tracker, exercised
//! through the public lib surface the way the session layer drives them.

use std::time::Duration;

use realtime_service::websocket::{
    events::ServerEvent,
    typing::{TypingTracker, TYPING_EXPIRY},
    ConnectionRegistry,
};
use uuid::Uuid;

fn test_redis() -> redis::Client {
    // Parsed but never connected; publish failures are swallowed by the
    // fan-out helpers.
    redis::Client::open("redis://127.0.0.1:1/").unwrap()
}

#[tokio::test]
async fn broadcast_hits_member_set_at_call_time() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();

    let (first, mut first_rx) = registry.register(Uuid::new_v4()).await;
    registry.join(room, first).await;

    registry.broadcast(room, "one").await;

    let (second, mut second_rx) = registry.register(Uuid::new_v4()).await;
    registry.join(room, second).await;

    registry.broadcast(room, "two").await;

    assert_eq!(first_rx.recv().await.unwrap(), "one");
    assert_eq!(first_rx.recv().await.unwrap(), "two");
    // The late joiner never sees the earlier event.
    assert_eq!(second_rx.recv().await.unwrap(), "two");
    assert!(second_rx.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_join_does_not_grow_membership() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();

    let (conn, mut rx) = registry.register(Uuid::new_v4()).await;
    registry.join(room, conn).await;
    registry.join(room, conn).await;

    assert_eq!(registry.room_size(room).await, 1);

    // And a broadcast is delivered once, not twice.
    registry.broadcast(room, "once").await;
    assert_eq!(rx.recv().await.unwrap(), "once");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_detaches_from_every_room() {
    let registry = ConnectionRegistry::new();
    let room_a = Uuid::new_v4();
    let room_b = Uuid::new_v4();

    let (conn, mut rx) = registry.register(Uuid::new_v4()).await;
    registry.join(room_a, conn).await;
    registry.join(room_b, conn).await;

    registry.unregister(conn).await;

    registry.broadcast(room_a, "a").await;
    registry.broadcast(room_b, "b").await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn notify_user_spans_tabs_without_shared_rooms() {
    let registry = ConnectionRegistry::new();
    let user = Uuid::new_v4();
    let room = Uuid::new_v4();

    // Tab one sits in a room, tab two in none.
    let (tab1, mut tab1_rx) = registry.register(user).await;
    let (_tab2, mut tab2_rx) = registry.register(user).await;
    registry.join(room, tab1).await;

    registry.notify_user(user, "direct").await;

    assert_eq!(tab1_rx.recv().await.unwrap(), "direct");
    assert_eq!(tab2_rx.recv().await.unwrap(), "direct");
}

#[tokio::test]
async fn non_members_hear_nothing() {
    let registry = ConnectionRegistry::new();
    let room = Uuid::new_v4();

    let (member, mut member_rx) = registry.register(Uuid::new_v4()).await;
    let (_other, mut other_rx) = registry.register(Uuid::new_v4()).await;
    registry.join(room, member).await;

    // A business action fans a chat message out to the room; the user who
    // never joined is not in the member set and receives nothing.
    let event = ServerEvent::MessagesRead {
        conversation_id: room,
        user_id: Uuid::new_v4(),
    };
    registry.broadcast(room, &event.to_json().unwrap()).await;

    let raw = member_rx.recv().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["type"], "messages-read");
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn silent_typist_goes_idle_after_expiry() {
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

    let started: serde_json::Value =
        serde_json::from_str(&peer_rx.recv().await.unwrap()).unwrap();
    assert_eq!(started["is_typing"], true);

    tokio::time::sleep(TYPING_EXPIRY + Duration::from_millis(50)).await;

    let stopped: serde_json::Value =
        serde_json::from_str(&peer_rx.recv().await.unwrap()).unwrap();
    assert_eq!(stopped["type"], "user-typing");
    assert_eq!(stopped["is_typing"], false);
    assert_eq!(stopped["user_id"], typist.to_string());
}
