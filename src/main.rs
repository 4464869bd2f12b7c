#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

mod bridge_store;
mod config;
mod db;
mod event;
mod kv;
mod normalize;
mod pipeline;
mod platform;
mod supervisor;
mod utils;
mod web;

use bridge_store::BridgeStore;
use config::Config;
use kv::{KvStore, RedisKv};
use pipeline::{
    spawn_worker, BreakerConfig, CircuitBreakers, DeliveryWorker, Ingestor, LoopFilter,
    RateLimiter, RouterWorker,
};
use platform::{DiscordAdapter, FluxerAdapter, PlatformAdapter, PlatformRegistry};
use supervisor::WorkerSupervisor;
use web::AdminApi;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let config = Arc::new(Config::load()?);
    info!("janus bridge starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKv::connect(&config.kv.url)
            .await
            .with_context(|| format!("failed to connect to kv store at {}", config.kv.url))?,
    );

    let ingestor = Arc::new(Ingestor::new(kv.clone()));

    let discord = Arc::new(DiscordAdapter::new(config.auth.discord_token.clone()));
    let fluxer = Arc::new(FluxerAdapter::new(config.auth.fluxer_token.clone()));
    discord.bind_ingest(ingestor.clone()).await;
    fluxer.bind_ingest(ingestor.clone()).await;

    // Token validation is best effort: a platform outage must not keep the
    // bridge from draining its queues.
    if let Err(e) = discord.connect().await {
        warn!(error = %e, "discord connect failed, continuing");
    }
    if let Err(e) = fluxer.connect().await {
        warn!(error = %e, "fluxer connect failed, continuing");
    }

    let registry = PlatformRegistry::new(
        discord.clone() as Arc<dyn PlatformAdapter>,
        fluxer.clone() as Arc<dyn PlatformAdapter>,
    );

    let loop_filter = Arc::new(LoopFilter::new(kv.clone(), config.limits.loop_hash_ttl));
    let rate_limiter = Arc::new(RateLimiter::new(
        kv.clone(),
        config.limits.rate_limit_per_channel,
        config.limits.rate_limit_window_seconds,
    ));
    let breakers = Arc::new(CircuitBreakers::new(BreakerConfig::from(&config.breaker)));

    let delivery = Arc::new(DeliveryWorker::new(
        db_manager.pair_store(),
        db_manager.message_map_store(),
        registry.clone(),
        rate_limiter,
        loop_filter.clone(),
        breakers,
        kv.clone(),
        config.web.fluxer_web_base_url.clone(),
        config.limits.edit_update_ttl_seconds,
    ));

    let (bridge_events_tx, bridge_events_rx) = mpsc::channel(16);
    let bridge_store = Arc::new(BridgeStore::new(
        db_manager.pair_store(),
        registry.clone(),
        bridge_events_tx,
    ));

    let supervisor = Arc::new(WorkerSupervisor::new(
        bridge_store.clone(),
        db_manager.pair_store(),
        delivery,
        kv.clone(),
    ));
    supervisor.start().await?;
    let supervisor_handle = tokio::spawn(supervisor.clone().run(bridge_events_rx));

    let router = Arc::new(RouterWorker::new(
        db_manager.pair_store(),
        loop_filter,
        registry,
        kv.clone(),
    ));
    let (router_stop_tx, router_stop_rx) = watch::channel(false);
    let router_handle = spawn_worker(ingestor.queue(), router, router_stop_rx);

    let admin_api = AdminApi::new(&config, bridge_store.clone());
    let web_handle = tokio::spawn(async move {
        if let Err(e) = admin_api.serve().await {
            error!("admin api error: {}", e);
        }
    });

    tokio::pin!(web_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("admin api task exited, beginning shutdown");
        },
    }

    let _ = router_stop_tx.send(true);
    if let Err(e) = router_handle.await {
        error!("router worker shutdown error: {}", e);
    }

    supervisor.shutdown().await;
    supervisor_handle.abort();
    web_handle.abort();

    if let Err(e) = discord.disconnect().await {
        error!("discord shutdown error: {}", e);
    }
    if let Err(e) = fluxer.disconnect().await {
        error!("fluxer shutdown error: {}", e);
    }

    info!("janus bridge shutting down");
    Ok(())
}
