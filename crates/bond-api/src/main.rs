use bond_api::{build_router, ApiConfig, AppState};
use bond_engine::BondEngine;
use bond_storage::MemoryStore;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "bond_api=debug,bond_engine=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ApiConfig::parse();
    let engine = BondEngine::new(Arc::new(MemoryStore::new()), config.engine_config())?;
    let state = Arc::new(AppState::new(engine));
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!("bondd running on {}", config.listen);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
