//! Rolegate REST API Server
//!
//! Run with: cargo run --features server --bin rolegate-server

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rolegate::server::{build_router, AppState};
use rolegate::{Engine, EngineConfig, LmdbStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db_path = std::env::var("ROLEGATE_DB").unwrap_or_else(|_| "./data/rolegate.mdb".into());
    tracing::info!(%db_path, "opening authorization store");
    let store = Arc::new(LmdbStore::open(&db_path)?);
    let config = EngineConfig::from_env()?;
    tracing::info!(admin_capability = %config.admin_capability, "administrative writes gated");
    let engine = Engine::new(store, &config);

    let app = build_router(Arc::new(AppState { engine, config }));

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(%addr, "rolegate server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
