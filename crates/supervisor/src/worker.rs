use std::time::Duration;

use async_trait::async_trait;
use boxsync_storage::StorageLayout;
use tokio::process::{Child, Command};

use crate::{SupervisorConfig, SupervisorError};

/// Handle to one spawned backend process.
#[async_trait]
pub trait WorkerProcess: Send {
    /// False once the process has exited.
    async fn is_running(&mut self) -> bool;
    /// Ask the process to stop; it may take a while to honor it.
    async fn terminate(&mut self);
    /// Stop the process immediately and reap it.
    async fn kill(&mut self);
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, port: u16) -> Result<Box<dyn WorkerProcess>, SupervisorError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, port: u16) -> bool;
}

/// Spawns real worker processes with the shared-storage environment pinned,
/// so every worker resolves the same on-disk stores.
pub struct ProcessSpawner {
    config: SupervisorConfig,
}

impl ProcessSpawner {
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, port: u16) -> Result<Box<dyn WorkerProcess>, SupervisorError> {
        let layout = StorageLayout::new(&self.config.shared_root);
        let child = Command::new(&self.config.worker_binary)
            .env("PORT", port.to_string())
            .env("HOST", &self.config.worker_host)
            .env("SHARED_STORAGE_ROOT", &self.config.shared_root)
            .env("FILES_DIR", &layout.files_dir)
            .env("VERSIONS_DIR", &layout.versions_dir)
            .env("METADATA_DIR", layout.metadata_root())
            .env("CHUNKS_DIR", &layout.chunks_dir)
            .env("CONFLICTS_DIR", &layout.conflicts_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| SupervisorError::Spawn(error.to_string()))?;
        tracing::info!(port, pid = child.id(), "spawned worker");
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    async fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM first; the hard kill is reserved for stragglers that
    /// outlive the grace window.
    async fn terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // id() is None once the child has been reaped.
        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(error) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // ESRCH means the process is already gone.
            if error != nix::errno::Errno::ESRCH {
                tracing::warn!(pid, %error, "failed to signal worker");
            }
        }
    }

    async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Probes `GET /health` on a worker's internal port with a short timeout.
pub struct HttpProbe {
    host: String,
    client: reqwest::Client,
}

impl HttpProbe {
    #[must_use]
    pub fn new(host: String, timeout: Duration) -> Self {
        Self {
            host,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, port: u16) -> bool {
        let url = format!("http://{}:{}/health", self.host, port);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
