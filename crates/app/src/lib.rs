#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use boxsync_api::ApiState;
use boxsync_storage::{SharedStores, StorageLayout};

/// Worker process configuration, read from the environment the supervisor
/// pins for every worker it spawns.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    pub layout: StorageLayout,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(
            std::env::var("HOST").ok(),
            std::env::var("PORT").ok(),
            std::env::var("SHARED_STORAGE_ROOT").ok(),
            std::env::var("FILES_DIR").ok(),
            std::env::var("VERSIONS_DIR").ok(),
            std::env::var("METADATA_DIR").ok(),
            std::env::var("CHUNKS_DIR").ok(),
            std::env::var("CONFLICTS_DIR").ok(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_values(
        host: Option<String>,
        port: Option<String>,
        shared_root: Option<String>,
        files_dir: Option<String>,
        versions_dir: Option<String>,
        metadata_dir: Option<String>,
        chunks_dir: Option<String>,
        conflicts_dir: Option<String>,
    ) -> anyhow::Result<Self> {
        let host = host.unwrap_or_else(|| "127.0.0.1".to_owned());
        let port = port.as_deref().unwrap_or("8080");
        let listen_addr = SocketAddr::from_str(&format!("{host}:{port}"))?;

        let shared_root =
            shared_root.ok_or_else(|| anyhow::anyhow!("SHARED_STORAGE_ROOT must be set"))?;
        let mut layout = StorageLayout::new(shared_root);
        if let Some(dir) = files_dir {
            layout = layout.with_files_dir(dir);
        }
        if let Some(dir) = versions_dir {
            layout = layout.with_versions_dir(dir);
        }
        if let Some(dir) = metadata_dir {
            layout = layout.with_metadata_dir(dir);
        }
        if let Some(dir) = chunks_dir {
            layout = layout.with_chunks_dir(dir);
        }
        if let Some(dir) = conflicts_dir {
            layout = layout.with_conflicts_dir(dir);
        }

        Ok(Self {
            listen_addr,
            layout,
        })
    }
}

pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let stores = Arc::new(SharedStores::open(&config.layout).await?);
    let state = ApiState::new(stores);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(
        addr = %config.listen_addr,
        root = %config.layout.root.display(),
        "worker listening"
    );
    axum::serve(listener, boxsync_api::router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::WorkerConfig;

    #[test]
    fn from_values_uses_defaults() {
        let config = WorkerConfig::from_values(
            None,
            None,
            Some("/srv/boxsync".to_owned()),
            None,
            None,
            None,
            None,
            None,
        )
        .expect("parse config");

        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(
            config.layout.files_dir,
            std::path::PathBuf::from("/srv/boxsync/files")
        );
    }

    #[test]
    fn from_values_requires_shared_root() {
        let error = WorkerConfig::from_values(
            None,
            Some("9001".to_owned()),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .expect_err("missing SHARED_STORAGE_ROOT should fail");

        assert!(error.to_string().contains("SHARED_STORAGE_ROOT"));
    }

    #[test]
    fn from_values_rejects_invalid_port() {
        let error = WorkerConfig::from_values(
            None,
            Some("not-a-port".to_owned()),
            Some("/srv/boxsync".to_owned()),
            None,
            None,
            None,
            None,
            None,
        )
        .expect_err("invalid port should fail");

        assert!(!error.to_string().is_empty());
    }

    #[test]
    fn from_values_applies_directory_overrides() {
        let config = WorkerConfig::from_values(
            Some("0.0.0.0".to_owned()),
            Some("9001".to_owned()),
            Some("/srv/boxsync".to_owned()),
            Some("/fast/files".to_owned()),
            None,
            None,
            Some("/scratch/chunks".to_owned()),
            None,
        )
        .expect("parse config");

        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:9001");
        assert_eq!(config.layout.files_dir, std::path::PathBuf::from("/fast/files"));
        assert_eq!(
            config.layout.chunks_dir,
            std::path::PathBuf::from("/scratch/chunks")
        );
        assert_eq!(
            config.layout.versions_dir,
            std::path::PathBuf::from("/srv/boxsync/versions")
        );
    }
}
