use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use tower_http::compression::{CompressionLayer, CompressionLevel};

use tableforge::core::config::Config;
use tableforge::core::db::pool::{DbConfig, create_pool_with_migrations, health_check};
use tableforge::core::db::repositories::{
    ColumnRepository, PublicRepository, RowRepository, TableRepository,
};
use tableforge::core::public::{PublicApiState, public_api_router};
use tableforge::core::rows::{RowApiState, row_api_router};
use tableforge::core::tables::{TableApiState, table_api_router};

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    tracing::info!(
        "Config loaded: database={}, listen_addr={}",
        config.has_database(),
        config.listen_addr
    );

    let db_config = match DbConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let pool = match create_pool_with_migrations(&db_config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let table_repo = TableRepository::new(pool.clone());
    let column_repo = ColumnRepository::new(pool.clone());
    let row_repo = RowRepository::new(pool.clone());
    let public_repo = PublicRepository::new(pool.clone());

    let app = Router::new()
        .route("/health", get(health_handler).with_state(pool))
        .merge(table_api_router(TableApiState {
            table_repo: table_repo.clone(),
            column_repo,
        }))
        .merge(row_api_router(RowApiState {
            table_repo,
            row_repo,
        }))
        .merge(public_api_router(PublicApiState { public_repo }))
        // Compresses responses > 1KB, skips already compressed formats
        .layer(
            CompressionLayer::new()
                .br(true)
                .gzip(true)
                .quality(CompressionLevel::Default),
        );

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {}", config.listen_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn health_handler(
    State(pool): State<sqlx::PgPool>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    health_check(&pool)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
