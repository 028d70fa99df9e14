#![forbid(unsafe_code)]

mod config;
mod pool;
mod proxy;
mod worker;

pub use config::SupervisorConfig;
pub use pool::WorkerPool;
pub use proxy::proxy_router;
pub use worker::{HealthProbe, HttpProbe, ProcessSpawner, WorkerProcess, WorkerSpawner};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no healthy workers available")]
    NoHealthyWorkers,
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
