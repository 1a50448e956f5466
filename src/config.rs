use std::time::Duration;

use crate::gateway::heartbeat;

/// Gateway protocol tuning, carried inside `AppState` so tests can shrink
/// the windows.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub heartbeat_interval: Duration,
    pub identify_timeout: Duration,
    pub resume_grace: Duration,
    pub resume_buffer_capacity: usize,
}

impl GatewayConfig {
    /// A missed deadline means two consecutive heartbeats never arrived.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: heartbeat::DEFAULT_HEARTBEAT_INTERVAL,
            identify_timeout: heartbeat::DEFAULT_IDENTIFY_TIMEOUT,
            resume_grace: heartbeat::DEFAULT_RESUME_GRACE,
            resume_buffer_capacity: heartbeat::DEFAULT_RESUME_BUFFER_CAPACITY,
        }
    }
}

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let mut gateway = GatewayConfig::default();

        if let Some(secs) = env_u64("CHORUS_HEARTBEAT_INTERVAL_SECS") {
            gateway.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHORUS_IDENTIFY_TIMEOUT_SECS") {
            gateway.identify_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CHORUS_RESUME_GRACE_SECS") {
            gateway.resume_grace = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_u64("CHORUS_RESUME_BUFFER") {
            gateway.resume_buffer_capacity = capacity as usize;
        }

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(39200),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:chorus.db?mode=rwc".to_string()),
            gateway,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("PORT");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("CHORUS_HEARTBEAT_INTERVAL_SECS");
        std::env::remove_var("CHORUS_IDENTIFY_TIMEOUT_SECS");
        std::env::remove_var("CHORUS_RESUME_GRACE_SECS");
        std::env::remove_var("CHORUS_RESUME_BUFFER");
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.port, 39200);
        assert_eq!(config.database_url, "sqlite:chorus.db?mode=rwc");
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(45));
        assert_eq!(config.gateway.resume_buffer_capacity, 1024);
    }

    #[test]
    #[serial]
    fn test_port_from_env() {
        clear_env();
        std::env::set_var("PORT", "8080");
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
    }

    #[test]
    #[serial]
    fn test_invalid_port_falls_back_to_default() {
        clear_env();
        std::env::set_var("PORT", "not_a_number");
        let config = Config::from_env();
        assert_eq!(config.port, 39200);
    }

    #[test]
    #[serial]
    fn test_gateway_tuning_from_env() {
        clear_env();
        std::env::set_var("CHORUS_HEARTBEAT_INTERVAL_SECS", "10");
        std::env::set_var("CHORUS_RESUME_GRACE_SECS", "20");
        std::env::set_var("CHORUS_RESUME_BUFFER", "64");
        let config = Config::from_env();
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.gateway.heartbeat_timeout(), Duration::from_secs(20));
        assert_eq!(config.gateway.resume_grace, Duration::from_secs(20));
        assert_eq!(config.gateway.resume_buffer_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_heartbeat_timeout_is_twice_the_interval() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(
            config.gateway.heartbeat_timeout(),
            config.gateway.heartbeat_interval * 2
        );
    }
}
