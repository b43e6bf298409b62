use checkout::config::Config;
use checkout::routes::{hold_routes, order_routes, product_routes, webhook_routes};
use checkout::{db, sweeper, AppState};

use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("checkout=debug".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = Arc::new(Config::from_env());

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running migrations...");
    db::run_migrations(&pool).await?;

    let state = AppState::new(pool.clone(), config.clone());

    // Spawn the expiry/drain sweeper
    sweeper::spawn_sweeper(
        pool,
        state.holds.clone(),
        state.webhooks.clone(),
        config.sweep_period,
    );

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .nest("/api/products", product_routes())
        .nest("/api/holds", hold_routes())
        .nest("/api/orders", order_routes())
        .nest("/api/payments", webhook_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Checkout service listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
