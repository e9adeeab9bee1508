//! RPS Arena Server
//!
//! Wires the in-memory store and ledger to the arena, starts the
//! settlement batcher, and serves WebSocket clients until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rps_arena::{
    config::ArenaConfig,
    engine::{Arena, SettlementBatcher},
    ledger::MemoryLedger,
    network::GameServer,
    notify::BroadcastNotifier,
    store::MemoryStore,
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ArenaConfig::from_env();
    info!("RPS Arena Server v{}", VERSION);
    info!("Rules: first to {} wins, round cap {}, tie policy {:?}",
        config.engine.wins_to_conclude, config.engine.round_cap, config.engine.tie_policy);
    if !config.auth.is_configured() {
        warn!("JWT auth not configured; trusting client-claimed participant ids");
    }

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new().with_signature_checks(config.engine.verify_authorizations));
    let notifier = Arc::new(BroadcastNotifier::default());

    let arena = Arc::new(Arena::new(store.clone(), notifier.clone(), &config.engine));
    let server = Arc::new(GameServer::new(
        config.server.clone(),
        config.auth.clone(),
        arena,
        notifier.clone(),
    ));

    let batcher_handle = if config.settlement.enabled {
        let batcher = Arc::new(SettlementBatcher::new(
            store,
            ledger,
            notifier,
            config.settlement.clone(),
            config.engine.winner_payout_bps,
        ));
        Some(batcher.spawn(server.shutdown_signal()))
    } else {
        info!("Settlement batcher disabled");
        None
    };

    let ctrl_c_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;

    if let Some(handle) = batcher_handle {
        handle.await.context("settlement batcher panicked")?;
    }
    info!("Shutdown complete");
    Ok(())
}
