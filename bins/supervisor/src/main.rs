//! boxsync-supervisord: owns the public port, runs N workers over one
//! shared storage root, and keeps the fleet alive.

#![forbid(unsafe_code)]

use std::sync::Arc;

use boxsync_supervisor::{
    proxy_router, HttpProbe, ProcessSpawner, SupervisorConfig, WorkerPool,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SupervisorConfig::from_env()?;
    let spawner = Arc::new(ProcessSpawner::new(config.clone()));
    let probe = Arc::new(HttpProbe::new(
        config.worker_host.clone(),
        config.probe_timeout,
    ));
    let pool = Arc::new(WorkerPool::new(config.clone(), spawner, probe));

    // Bring the fleet up before accepting traffic, then keep probing and
    // respawning in the background for as long as the proxy runs.
    pool.start().await?;
    let health_pool = Arc::clone(&pool);
    let health_loop = tokio::spawn(async move {
        health_pool.run_health_loop().await;
    });

    let listener =
        tokio::net::TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    info!(
        addr = %format!("{}:{}", config.bind_address, config.port),
        workers = config.min_instances,
        root = %config.shared_root.display(),
        "supervisor listening"
    );
    axum::serve(
        listener,
        proxy_router(Arc::clone(&pool), config.worker_host.clone()),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested, draining workers");
    })
    .await?;

    // Listener is closed; stop probing and take the workers down,
    // SIGTERM first, hard kill after the grace window.
    health_loop.abort();
    pool.shutdown().await;
    Ok(())
}
