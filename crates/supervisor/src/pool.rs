use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use boxsync_core::protocol::{SupervisorStatus, WorkerStatus};
use tokio::sync::Mutex;

use crate::worker::{HealthProbe, WorkerProcess, WorkerSpawner};
use crate::{SupervisorConfig, SupervisorError};

struct Worker {
    process: Box<dyn WorkerProcess>,
    healthy: bool,
    started_at: String,
    last_health_check_at: Option<String>,
    unhealthy_since: Option<Instant>,
}

struct PoolState {
    workers: BTreeMap<u16, Worker>,
    next_port: u16,
    rr_cursor: usize,
}

/// Supervised worker fleet: spawning, health state, round-robin selection,
/// and bounded crash recovery. Dispatch itself lives in the proxy layer.
pub struct WorkerPool {
    config: SupervisorConfig,
    spawner: Arc<dyn WorkerSpawner>,
    probe: Arc<dyn HealthProbe>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        spawner: Arc<dyn WorkerSpawner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let next_port = config.worker_base_port;
        Self {
            config,
            spawner,
            probe,
            state: Mutex::new(PoolState {
                workers: BTreeMap::new(),
                next_port,
                rr_cursor: 0,
            }),
        }
    }

    /// Spawn the initial fleet, staggered to reduce disk contention while
    /// each worker runs its metadata migration.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        for i in 0..self.config.min_instances {
            if i > 0 {
                tokio::time::sleep(self.config.spawn_stagger).await;
            }
            self.spawn_one().await?;
        }
        Ok(())
    }

    async fn spawn_one(&self) -> Result<u16, SupervisorError> {
        let port = {
            let mut state = self.state.lock().await;
            let port = state.next_port;
            state.next_port += 1;
            port
        };
        let process = self.spawner.spawn(port).await?;
        let mut state = self.state.lock().await;
        state.workers.insert(
            port,
            Worker {
                process,
                healthy: false,
                started_at: chrono::Utc::now().to_rfc3339(),
                last_health_check_at: None,
                unhealthy_since: None,
            },
        );
        Ok(port)
    }

    pub async fn run_health_loop(&self) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.health_check_all().await;
            self.reap_and_replace().await;
        }
    }

    /// Probe every worker. A first success flips it healthy; staying
    /// unhealthy past the grace gets it terminated (the next reap pass
    /// replaces it).
    pub async fn health_check_all(&self) {
        let ports: Vec<u16> = {
            let state = self.state.lock().await;
            state.workers.keys().copied().collect()
        };

        for port in ports {
            let responded = self.probe.probe(port).await;
            let checked_at = chrono::Utc::now().to_rfc3339();
            let mut expired = false;
            {
                let mut state = self.state.lock().await;
                let Some(worker) = state.workers.get_mut(&port) else {
                    continue;
                };
                worker.last_health_check_at = Some(checked_at);
                if responded {
                    if !worker.healthy {
                        tracing::info!(port, "worker healthy");
                    }
                    worker.healthy = true;
                    worker.unhealthy_since = None;
                } else {
                    if worker.healthy {
                        tracing::warn!(port, "worker became unhealthy");
                    }
                    worker.healthy = false;
                    let since = worker.unhealthy_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > self.config.unhealthy_grace {
                        expired = true;
                    }
                }
            }
            if expired {
                tracing::warn!(port, "worker unhealthy past grace, terminating");
                self.remove_and_kill(port).await;
            }
        }
    }

    /// Drop exited workers and respawn within `[min_instances, max_instances]`.
    /// Zero healthy restores the whole quorum at once; otherwise one
    /// replacement per pass.
    pub async fn reap_and_replace(&self) {
        let ports: Vec<u16> = {
            let state = self.state.lock().await;
            state.workers.keys().copied().collect()
        };
        for port in ports {
            let mut state = self.state.lock().await;
            let exited = match state.workers.get_mut(&port) {
                Some(worker) => !worker.process.is_running().await,
                None => false,
            };
            if exited {
                tracing::warn!(port, "worker exited");
                state.workers.remove(&port);
            }
        }

        let (healthy, total) = self.counts().await;
        if healthy >= self.config.min_instances {
            return;
        }
        let deficit = self.config.min_instances - healthy;
        let headroom = self.config.max_instances.saturating_sub(total);
        let to_spawn = if healthy == 0 {
            deficit.min(headroom)
        } else {
            headroom.min(1)
        };
        for _ in 0..to_spawn {
            if let Err(error) = self.spawn_one().await {
                tracing::error!(%error, "failed to spawn replacement worker");
                break;
            }
        }
    }

    async fn remove_and_kill(&self, port: u16) {
        let worker = {
            let mut state = self.state.lock().await;
            state.workers.remove(&port)
        };
        if let Some(mut worker) = worker {
            worker.process.kill().await;
        }
    }

    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        let healthy = state.workers.values().filter(|w| w.healthy).count();
        (healthy, state.workers.len())
    }

    /// Round-robin over the healthy subset.
    pub async fn pick_worker(&self) -> Result<u16, SupervisorError> {
        let mut state = self.state.lock().await;
        let healthy: Vec<u16> = state
            .workers
            .iter()
            .filter(|(_, worker)| worker.healthy)
            .map(|(port, _)| *port)
            .collect();
        if healthy.is_empty() {
            return Err(SupervisorError::NoHealthyWorkers);
        }
        let port = healthy[state.rr_cursor % healthy.len()];
        state.rr_cursor = state.rr_cursor.wrapping_add(1);
        Ok(port)
    }

    /// Transport-level dispatch failure feedback from the proxy.
    pub async fn mark_unhealthy(&self, port: u16) {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.get_mut(&port) {
            if worker.healthy {
                tracing::warn!(port, "worker failed a proxied request");
            }
            worker.healthy = false;
            worker.unhealthy_since.get_or_insert_with(Instant::now);
        }
    }

    pub async fn status(&self) -> SupervisorStatus {
        let state = self.state.lock().await;
        let healthy_servers = state.workers.values().filter(|w| w.healthy).count();
        SupervisorStatus {
            proxy_port: self.config.port,
            bind_address: self.config.bind_address.clone(),
            total_servers: state.workers.len(),
            healthy_servers,
            shared_storage_root: self.config.shared_root.display().to_string(),
            servers: state
                .workers
                .iter()
                .map(|(port, worker)| WorkerStatus {
                    port: *port,
                    healthy: worker.healthy,
                    started_at: worker.started_at.clone(),
                    last_health_check_at: worker.last_health_check_at.clone(),
                })
                .collect(),
        }
    }

    /// Gentle signal to every worker, a grace window, then a hard kill for
    /// stragglers.
    pub async fn shutdown(&self) {
        let mut workers = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.workers)
        };
        for worker in workers.values_mut() {
            worker.process.terminate().await;
        }
        tokio::time::sleep(self.config.shutdown_grace).await;
        for (port, mut worker) in workers {
            if worker.process.is_running().await {
                worker.process.kill().await;
            }
            tracing::info!(port, "worker stopped");
        }
    }
}
