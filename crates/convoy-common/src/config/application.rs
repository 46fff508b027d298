use std::collections::BTreeMap;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// The environment variable prefix for configuration overrides.
/// Nested keys are separated by double underscores, e.g.
/// `CONVOY__FAULT_DETECTION__PING_RETRIES=5`.
pub const CONFIG_ENV_PREFIX: &str = "CONVOY__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub fault_detection: FaultDetectionConfig,
    pub persistent_tasks: PersistentTasksConfig,
    pub rpc: RpcConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Self::figment()
            .admerge(Env::prefixed(CONFIG_ENV_PREFIX).map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::invalid(e.to_string()))
    }

    /// Loads the built-in defaults only, ignoring the environment.
    pub fn default_config() -> CommonResult<Self> {
        Self::figment()
            .extract()
            .map_err(|e| CommonError::invalid(e.to_string()))
    }

    fn figment() -> Figment {
        Figment::from(Toml::string(DEFAULT_CONFIG))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub node_id: String,
    /// Free-form node attributes that task affinity rules can match on.
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultDetectionConfig {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub ping_retries: usize,
    /// Whether transport connection-closed events raise a disconnect immediately.
    pub register_connection_listener: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentTasksConfig {
    /// The number of finished tasks whose outcome is kept for status queries.
    pub completed_task_retention: usize,
    pub notifier_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed(FixedRetryStrategy),
    ExponentialBackoff(ExponentialBackoffRetryStrategy),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRetryStrategy {
    pub max_count: usize,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoffRetryStrategy {
    pub max_count: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() -> CommonResult<()> {
        let config = AppConfig::default_config()?;
        assert_eq!(config.fault_detection.ping_interval_secs, 1);
        assert_eq!(config.fault_detection.ping_timeout_secs, 30);
        assert_eq!(config.fault_detection.ping_retries, 3);
        assert!(config.fault_detection.register_connection_listener);
        assert!(matches!(
            config.rpc.retry_strategy,
            RetryStrategy::ExponentialBackoff(ExponentialBackoffRetryStrategy {
                max_count: 3,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CONVOY__FAULT_DETECTION__PING_RETRIES", "5");
            jail.set_env("CONVOY__CLUSTER__NODE_ID", "node-7");
            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.fault_detection.ping_retries, 5);
            assert_eq!(config.cluster.node_id, "node-7");
            Ok(())
        });
    }
}
