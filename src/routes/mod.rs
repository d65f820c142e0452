use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;

pub mod conversations;
use conversations::{create_conversation, get_conversation, mark_as_read};
pub mod messages;
use messages::{get_message_history, send_message};
pub mod notifications;
use notifications::{create_notification, get_notifications, mark_all_read, mark_notification_read};
pub mod wsroute;
use wsroute::ws_handler;

async fn health() -> &'static str {
    "OK"
}

pub fn build_router(state: AppState) -> Router {
    // Service introspection endpoints (no API version prefix, no auth -
    // healthchecks and scrapers hit these).
    let introspection = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(crate::metrics::metrics_handler));

    // API v1 endpoints behind the Bearer middleware.
    let api_v1 = Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/:id", get(get_conversation))
        .route(
            "/conversations/:id/messages",
            post(send_message).get(get_message_history),
        )
        .route("/conversations/:id/read", post(mark_as_read))
        .route(
            "/notifications",
            post(create_notification).get(get_notifications),
        )
        .route("/notifications/:id/read", put(mark_notification_read))
        .route("/notifications/read-all", put(mark_all_read))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    // The WebSocket endpoint authenticates inside its own handshake
    // (query token or first frame), so it sits outside the Bearer layer.
    let ws = Router::new().route("/ws", get(ws_handler));

    let router = Router::new()
        .merge(introspection)
        .nest("/api/v1", api_v1.merge(ws))
        .layer(middleware::from_fn(crate::metrics::track_http_metrics))
        .layer(CorsLayer::permissive());

    crate::middleware::with_defaults(router).with_state(state)
}
