//! Gateway configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "GatewayConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Directory holding the record store.
    #[serde(default = "GatewayConfig::default_data_dir")]
    pub data_dir: String,

    /// Logical table holding server records.
    #[serde(default = "GatewayConfig::default_table_name")]
    pub table_name: String,

    /// Seconds between idle sweeps. Zero disables the built-in timer.
    #[serde(default = "GatewayConfig::default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Allowed CORS origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "GatewayConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds. Must cover the launch polling bound.
    #[serde(default = "GatewayConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_data_dir() -> String {
        "/data/lodestone".to_string()
    }

    fn default_table_name() -> String {
        "server-config".to_string()
    }

    const fn default_sweep_interval() -> u64 {
        300 // 5 minutes
    }

    const fn default_max_body() -> usize {
        64 * 1024
    }

    const fn default_request_timeout() -> u64 {
        300
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LISTEN_ADDR`: HTTP listen address
    /// - `DATA_DIR`: record store directory
    /// - `CONFIG_TABLE_NAME`: record table name
    /// - `SWEEP_INTERVAL_SECONDS`: idle sweep period, `0` to disable
    /// - `CORS_ORIGINS`: comma-separated allowed origins
    /// - `REQUEST_TIMEOUT_SECONDS`: per-request timeout
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = std::env::var("CONFIG_TABLE_NAME") {
            config.table_name = val;
        }
        if let Ok(val) = std::env::var("SWEEP_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.sweep_interval_seconds = secs;
            }
        }
        if let Ok(val) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = val
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("REQUEST_TIMEOUT_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.request_timeout_seconds = secs;
            }
        }

        config
    }

    /// Get the sweep period, or `None` if the timer is disabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            data_dir: Self::default_data_dir(),
            table_name: Self::default_table_name(),
            sweep_interval_seconds: Self::default_sweep_interval(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.table_name, "server-config");
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.max_body_bytes, 64 * 1024);
    }

    #[test]
    fn zero_interval_disables_sweeps() {
        let config = GatewayConfig {
            sweep_interval_seconds: 0,
            ..GatewayConfig::default()
        };
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"listen_addr": "127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert!(config.cors_origins.is_empty());
    }
}
