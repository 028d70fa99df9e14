//! boxsync-server: one backend worker. Normally spawned by the
//! supervisor with the shared-storage environment pinned, but runs fine
//! standalone against its own root.

#![forbid(unsafe_code)]

use boxsync_app::WorkerConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        root = %config.layout.root.display(),
        "worker starting"
    );
    boxsync_app::run(config).await
}
