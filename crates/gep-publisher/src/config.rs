//! Publisher configuration

use gep_core::{SecurityMode, DEFAULT_PORT, MAX_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Data publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Command channel listen address
    pub listen: String,
    /// Node identifier; a fresh id is drawn when unset
    pub node_id: Option<Uuid>,
    pub security_mode: SecurityMode,
    pub allow_metadata_refresh: bool,
    pub allow_nan_value_filter: bool,
    pub force_nan_value_filter: bool,
    pub cipher_key_rotation_period_ms: u64,
    /// Interval between NoOp liveness frames (0 = disabled)
    pub keepalive_interval_ms: u64,
    /// Initial read buffer capacity per connection
    pub max_packet_size: usize,
    /// TCP keep-alive idle time in seconds (0 = disabled)
    pub tcp_keepalive_secs: u64,
    /// Reverse-resolve subscriber host names when a connection starts
    pub resolve_host_names: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{}", DEFAULT_PORT),
            node_id: None,
            security_mode: SecurityMode::None,
            allow_metadata_refresh: true,
            allow_nan_value_filter: true,
            force_nan_value_filter: false,
            cipher_key_rotation_period_ms: 60_000,
            keepalive_interval_ms: 5_000,
            max_packet_size: MAX_PACKET_SIZE,
            tcp_keepalive_secs: 30,
            resolve_host_names: true,
        }
    }
}

impl PublisherConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub(crate) fn tcp_config(&self) -> gep_transport::TcpConfig {
        gep_transport::TcpConfig {
            read_buffer_size: self.max_packet_size,
            keepalive_secs: self.tcp_keepalive_secs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PublisherConfig::default();
        assert_eq!(config.listen, "0.0.0.0:6165");
        assert!(config.allow_metadata_refresh);
        assert!(config.allow_nan_value_filter);
        assert!(!config.force_nan_value_filter);
        assert_eq!(config.cipher_key_rotation_period_ms, 60_000);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_tcp_config() {
        let config = PublisherConfig {
            max_packet_size: 1024,
            tcp_keepalive_secs: 0,
            ..Default::default()
        };
        let tcp = config.tcp_config();
        assert_eq!(tcp.read_buffer_size, 1024);
        assert_eq!(tcp.keepalive_secs, 0);
    }
}
