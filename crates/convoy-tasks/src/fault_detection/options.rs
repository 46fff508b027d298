use std::time::Duration;

use convoy_common::config::FaultDetectionConfig;

#[readonly::make]
#[derive(Debug, Clone)]
pub struct FaultDetectionOptions {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub ping_retries: usize,
    pub register_connection_listener: bool,
}

impl From<&FaultDetectionConfig> for FaultDetectionOptions {
    fn from(config: &FaultDetectionConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
            ping_retries: config.ping_retries,
            register_connection_listener: config.register_connection_listener,
        }
    }
}
