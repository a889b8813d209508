//! Matching, Risk and Negotiation engine — process entry point.
//!
//! Boots the `EntityStore`, wires the in-process collaborator doubles (a
//! live deployment replaces these at the composition root with the real
//! KYC/OCR/sanctions/notification integrations — see `collaborators.rs`),
//! and spawns the background loops: the matching scheduler's drain loop,
//! its periodic sweeper tick, and the outbox dispatcher.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tradecore_engine::collaborators::{InMemoryDocumentService, InMemoryIdentityProvider, StaticSanctionsList};
use tradecore_engine::config::PlatformConfig;
use tradecore_engine::store::EntityStore;
use tradecore_engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("tradecore engine starting");

    let config = PlatformConfig::from_env();
    let store = Arc::new(EntityStore::open(&config.db_path).with_context(|| format!("opening db {}", config.db_path))?);

    info!(db_path = %config.db_path, "entity store opened");

    // Composition-root collaborators. Real deployments swap these for live
    // KYC/OCR, sanctions-feed, and notification-gateway implementations
    // behind the same traits; this binary ships only the in-memory
    // doubles since those integrations are explicitly out of this crate's
    // scope.
    let identity = Arc::new(InMemoryIdentityProvider::new());
    let documents = Arc::new(InMemoryDocumentService::new());
    let sanctions = Arc::new(StaticSanctionsList::new(Vec::<String>::new()));

    let engine = Arc::new(Engine::new(config, store, identity, documents, sanctions));
    engine.bootstrap();

    info!("background loops started: matching drain, sweeper, outbox dispatcher");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    engine.shutdown();

    // Give spawned loops a moment to observe the shutdown signal and stop
    // cleanly before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradecore_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
