use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::middleware::auth;
use crate::state::AppState;
use crate::websocket::handlers::handle_socket;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket upgrade endpoint.
///
/// A token may be presented at handshake time (query parameter, or an
/// Authorization header for non-browser clients); if present it must be
/// valid. Without one the connection is accepted unauthenticated and must
/// send an `authenticate` frame before anything else.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.clone().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });

    let identity = match token {
        Some(token) => match auth::verify_token(&token, &state.config.jwt_secret) {
            Ok(user_id) => Some(user_id),
            Err(_) => {
                tracing::warn!("websocket upgrade rejected: invalid token");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, identity))
}
