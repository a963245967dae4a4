//! Connection settings
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;
use crate::io::PortFilter;
use crate::v5::meta::VexProduct;

/// Settings of a [`crate::connection::Connection`].
///
/// Durations are given in milliseconds. Any field left out of a TOML
/// document takes its default.
///
/// ```rust
/// use vexv5_link::config::ConnectionConfig;
///
/// let config = ConnectionConfig::from_toml_str("default_timeout = 2000").unwrap();
/// assert_eq!(config.default_timeout().as_millis(), 2000);
/// assert_eq!(config.baud_rate, 115200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub baud_rate: u32,
    /// Only endpoints matching one of these are used
    pub filters: Vec<PortFilter>,
    pub default_timeout: u64,
    /// How long a freshly opened port gets to answer the probe
    pub probe_timeout: u64,
    /// Reconnect on its own after the device goes away
    pub auto_reconnect: bool,
    pub reconnect_interval: u64,
    /// Garbage tolerated in the read buffer before giving up on the port
    pub max_resync_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            baud_rate: 115200,
            filters: vec![
                PortFilter::vex(VexProduct::V5Brain),
                PortFilter::vex(VexProduct::V5BrainDfu),
                PortFilter::vex(VexProduct::V5Controller),
            ],
            default_timeout: 1000,
            probe_timeout: 100,
            auto_reconnect: true,
            reconnect_interval: 1000,
            max_resync_bytes: 4096,
        }
    }
}

impl ConnectionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, DeviceError> {
        Ok(toml::from_str(source)?)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(
            ConnectionConfig::from_toml_str("").unwrap(),
            ConnectionConfig::default()
        );
    }

    #[test]
    fn overrides() {
        let config = ConnectionConfig::from_toml_str(
            r#"
            baud_rate = 9600
            auto_reconnect = false
            max_resync_bytes = 128

            [[filters]]
            vendor_id = 0x2888
            product_id = 0x0503
            "#,
        )
        .unwrap();

        assert_eq!(config.baud_rate, 9600);
        assert!(!config.auto_reconnect);
        assert_eq!(config.max_resync_bytes, 128);
        assert_eq!(config.filters, vec![PortFilter::new(0x2888, 0x0503)]);
        assert_eq!(config.probe_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn bad_types_are_config_errors() {
        let err = ConnectionConfig::from_toml_str("baud_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, DeviceError::ConfigError(_)));
    }
}
