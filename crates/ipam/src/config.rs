//! Allocator configuration

use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`IpamManager`](crate::IpamManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamConfig {
    /// Only pools with this location tag are loaded (all pools if None)
    pub location: Option<String>,
    /// Reject pools overlapping loopback, link-local, multicast or reserved space
    pub enforce_unicast: bool,
    /// Upper bound on every persistence gateway call
    #[serde(with = "humantime_serde")]
    pub gateway_timeout: Duration,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            location: None,
            enforce_unicast: true,
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

impl IpamConfig {
    /// Parse from a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Whether a pool with the given location tag belongs to this node
    pub fn accepts_location(&self, location: &str) -> bool {
        self.location
            .as_deref()
            .map_or(true, |wanted| wanted == location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_defaults() {
        let config = IpamConfig::default();
        assert!(config.enforce_unicast);
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert!(config.accepts_location("anywhere"));
    }

    #[test]
    fn test_from_toml() {
        let config = IpamConfig::from_toml_str(
            r#"
            location = "LOC"
            gateway_timeout = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.location.as_deref(), Some("LOC"));
        assert_eq!(config.gateway_timeout, Duration::from_millis(250));
        assert!(config.enforce_unicast);
        assert!(config.accepts_location("LOC"));
        assert!(!config.accepts_location("LOC2"));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(IpamConfig::from_toml_str("").unwrap(), IpamConfig::default());
    }

    #[test]
    fn test_bad_toml() {
        let err = IpamConfig::from_toml_str("gateway_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
