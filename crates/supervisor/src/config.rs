use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub bind_address: String,
    pub port: u16,
    /// Host workers bind and are probed on.
    pub worker_host: String,
    pub worker_base_port: u16,
    pub worker_binary: PathBuf,
    pub shared_root: PathBuf,
    pub min_instances: usize,
    pub max_instances: usize,
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
    /// Unhealthy beyond this is forcibly terminated and respawned.
    pub unhealthy_grace: Duration,
    /// Gentle-to-hard window during shutdown.
    pub shutdown_grace: Duration,
    /// Pause between spawns to reduce disk contention at migration.
    pub spawn_stagger: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_owned(),
            port: 8080,
            worker_host: "127.0.0.1".to_owned(),
            worker_base_port: 9001,
            worker_binary: PathBuf::from("boxsync-server"),
            shared_root: PathBuf::from("./data"),
            min_instances: 2,
            max_instances: 4,
            health_check_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            unhealthy_grace: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            spawn_stagger: Duration::from_secs(2),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_values(
            std::env::var("SUPERVISOR_HOST").ok(),
            std::env::var("SUPERVISOR_PORT").ok(),
            std::env::var("SHARED_STORAGE_ROOT").ok(),
            std::env::var("WORKER_BINARY").ok(),
            std::env::var("WORKER_BASE_PORT").ok(),
            std::env::var("MIN_INSTANCES").ok(),
            std::env::var("MAX_INSTANCES").ok(),
            std::env::var("HEALTH_CHECK_INTERVAL_SECS").ok(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_values(
        host: Option<String>,
        port: Option<String>,
        shared_root: Option<String>,
        worker_binary: Option<String>,
        worker_base_port: Option<String>,
        min_instances: Option<String>,
        max_instances: Option<String>,
        health_check_interval: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(host) = host {
            config.bind_address = host;
        }
        if let Some(port) = port {
            config.port = port.parse()?;
        }
        if let Some(root) = shared_root {
            config.shared_root = PathBuf::from(root);
        }
        if let Some(binary) = worker_binary {
            config.worker_binary = PathBuf::from(binary);
        }
        if let Some(base) = worker_base_port {
            config.worker_base_port = base.parse()?;
        }
        if let Some(min) = min_instances {
            config.min_instances = min.parse()?;
        }
        if let Some(max) = max_instances {
            config.max_instances = max.parse()?;
        }
        if let Some(secs) = health_check_interval {
            config.health_check_interval = Duration::from_secs(secs.parse()?);
        }

        if config.min_instances == 0 {
            return Err(anyhow::anyhow!("MIN_INSTANCES must be at least 1"));
        }
        if config.max_instances < config.min_instances {
            return Err(anyhow::anyhow!(
                "MAX_INSTANCES must be at least MIN_INSTANCES"
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operational_contract() {
        let config = SupervisorConfig::default();
        assert_eq!(config.min_instances, 2);
        assert_eq!(config.max_instances, 4);
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert_eq!(config.unhealthy_grace, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn from_values_overrides_and_validates() {
        let config = SupervisorConfig::from_values(
            Some("0.0.0.0".to_owned()),
            Some("9000".to_owned()),
            Some("/srv/boxsync".to_owned()),
            None,
            Some("9100".to_owned()),
            Some("3".to_owned()),
            Some("6".to_owned()),
            Some("1".to_owned()),
        )
        .expect("parse config");

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.worker_base_port, 9100);
        assert_eq!(config.min_instances, 3);
        assert_eq!(config.max_instances, 6);
        assert_eq!(config.health_check_interval, Duration::from_secs(1));
    }

    #[test]
    fn from_values_rejects_zero_min() {
        let error = SupervisorConfig::from_values(
            None,
            None,
            None,
            None,
            None,
            Some("0".to_owned()),
            None,
            None,
        )
        .expect_err("zero min should fail");
        assert!(error.to_string().contains("MIN_INSTANCES"));
    }

    #[test]
    fn from_values_rejects_max_below_min() {
        let error = SupervisorConfig::from_values(
            None,
            None,
            None,
            None,
            None,
            Some("3".to_owned()),
            Some("2".to_owned()),
            None,
        )
        .expect_err("max below min should fail");
        assert!(error.to_string().contains("MAX_INSTANCES"));
    }
}
