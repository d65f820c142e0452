use realtime_service::{
    config, db, error, logging, routes,
    state::AppState,
    websocket::{pubsub, typing::TypingTracker, ConnectionRegistry},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Run embedded migrations (idempotent). Treat failures as fatal -
    // the schema must be in sync before fan-out callers touch it.
    db::MIGRATOR
        .run(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let redis = redis::Client::open(cfg.redis_url.as_str())
        .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;

    let registry = ConnectionRegistry::new();
    let typing = TypingTracker::new();

    let state = AppState {
        db,
        registry: registry.clone(),
        typing,
        redis: redis.clone(),
        config: cfg.clone(),
    };

    // Cross-instance fan-out listener. Local fan-out keeps working if
    // Redis is down; members on other instances just stop hearing us.
    tokio::spawn(async move {
        if let Err(e) = pubsub::start_psub_listener(redis, registry).await {
            tracing::error!(error = %e, "redis pub/sub listener exited");
        }
    });

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-service");

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
