//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::{StrataError, StrataResult};
use crate::layer::LayerId;

/// Configuration for a Strata core instance.
///
/// # Examples
///
/// ```
/// use strata::StrataConfig;
///
/// let cfg = StrataConfig::from_json_str(r#"{"trait_config_layers": ["cmdb_meta"]}"#).unwrap();
/// assert_eq!(cfg.trait_config_layers.len(), 1);
/// assert!(cfg.cache.enabled);
/// assert_eq!(cfg.feed.capacity, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StrataConfig {
    /// Layers holding trait definitions or other meta-configuration.
    ///
    /// A write to one of these can change what every trait means, so it purges
    /// the effective-trait cache instead of growing it.
    pub trait_config_layers: Vec<LayerId>,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, cached trait queries always go to ground truth.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Max queued mutation events before new events are dropped.
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

impl StrataConfig {
    /// Parses a JSON configuration document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if the document is malformed.
    pub fn from_json_str(src: &str) -> StrataResult<Self> {
        serde_json::from_str(src)
            .map_err(|e| StrataError::invalid_value(format!("invalid configuration: {e}")))
    }

    /// Parses a YAML configuration document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidValue` if the document is malformed.
    pub fn from_yaml_str(src: &str) -> StrataResult<Self> {
        serde_yaml::from_str(src)
            .map_err(|e| StrataError::invalid_value(format!("invalid configuration: {e}")))
    }

    #[must_use]
    pub fn is_trait_config_layer(&self, layer: &LayerId) -> bool {
        self.trait_config_layers.contains(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StrataConfig::default();
        assert!(cfg.trait_config_layers.is_empty());
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.feed.capacity, 4096);
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = StrataConfig::from_json_str(r#"{"cache": {"enabled": false}}"#).unwrap();
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.feed.capacity, 4096);
    }

    #[test]
    fn test_from_yaml() {
        let cfg = StrataConfig::from_yaml_str(
            "trait_config_layers:\n  - cmdb_meta\nfeed:\n  capacity: 16\n",
        )
        .unwrap();
        assert!(cfg.is_trait_config_layer(&LayerId::new("cmdb_meta").unwrap()));
        assert_eq!(cfg.feed.capacity, 16);
    }

    #[test]
    fn test_invalid_layer_id_rejected() {
        let err = StrataConfig::from_json_str(r#"{"trait_config_layers": ["Bad Layer"]}"#)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
