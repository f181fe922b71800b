use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use salvo::prelude::*;
use tracing::info;

use collab_core::LockEngine;
use collab_gateway::locks::RedisLockStore;
use collab_gateway::{build_router, Gateway, GatewayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config_path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());
    let config = Arc::new(GatewayConfig::load(&config_path)?);

    info!(port = config.port, namespace = %config.namespace, "starting collaboration gateway");

    let store = RedisLockStore::new(&config.redis_url)?;
    let lock_engine = Arc::new(LockEngine::new(Arc::new(store), config.lock_ttl()));

    let gateway = Gateway::new(config.clone(), lock_engine);
    gateway.spawn_stale_reaper();

    let router = build_router(gateway.clone());
    let acceptor = TcpListener::new(format!("0.0.0.0:{}", config.port)).bind().await;

    let shutdown_gateway = gateway.clone();
    tokio::spawn(async move {
        collab_gateway::signal::wait_and_shutdown(shutdown_gateway).await;
        info!("shutdown sequence complete, exiting");
        std::process::exit(0);
    });

    info!(port = config.port, "collaboration gateway listening");
    Server::new(acceptor).serve(router).await;

    Ok(())
}
