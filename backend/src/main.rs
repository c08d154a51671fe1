use axum::http::{HeaderValue, Method};
use axum::Router;
use flick::{db::PgStore, get_db_pool, handlers, utils, BroadcastBus, Config, Core};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let config = Config::from_env()?;
    let db_config = flick::db::DatabaseConfig::from_env()?;
    let pool = get_db_pool(&db_config).await?;

    // Run migrations
    flick::db::migrations::run_migrations(&pool).await?;

    let core = Core::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(BroadcastBus::new()),
        Arc::new(utils::SystemClock),
        config.core.clone(),
    );
    tracing::info!("Match retention: {:?}", config.core.match_retention);

    // TTL enforcement independent of any client being online
    tokio::spawn(Arc::clone(&core.vault).run_reaper());

    let port = config.port;
    let app = create_router(core, &config);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server running on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(core: Core, config: &Config) -> Router {
    handlers::router(core).layer(create_cors_layer(config))
}

fn create_cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        // Default to permissive for development
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
