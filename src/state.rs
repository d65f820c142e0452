use crate::{
    config::Config,
    websocket::{typing::TypingTracker, ConnectionRegistry},
};
use sqlx::{Pool, Postgres};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub registry: ConnectionRegistry,
    pub typing: TypingTracker,
    pub redis: redis::Client,
    pub config: Arc<Config>,
}
