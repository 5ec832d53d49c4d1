//! Store and engine configuration.
//!
//! Both halves are plain `serde` structs with defaults, so a JSON config file
//! only needs the fields it wants to change:
//!
//! ```json
//! { "store": { "retention_cap": 500 }, "engine": { "timeout": 30 } }
//! ```
//!
//! Durations are written as seconds (`f64`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retention::{DEFAULT_RETENTION_CAP, RetentionPolicy};

/// Default ceiling on samples loaded by one query.
pub const DEFAULT_MAX_SAMPLES: usize = 50_000_000;

/// Default evaluation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default window an instant selector looks back for the latest sample.
pub const DEFAULT_LOOKBACK_DELTA: Duration = Duration::from_secs(5 * 60);

/// Umbrella configuration for a store and its evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store settings.
    pub store: StoreConfig,
    /// Evaluator settings.
    pub engine: EngineConfig,
}

impl Config {
    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be loaded, or a validation error from [`Config::validate`].
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates both halves.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.engine.validate()
    }
}

/// Settings for the in-memory series store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum samples retained per series; the oldest are dropped first.
    pub retention_cap: usize,
}

impl StoreConfig {
    /// Validates the store settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetentionCap`] for a zero cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retention_policy().map(|_| ())
    }

    /// Builds the retention policy described by this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetentionCap`] for a zero cap.
    pub fn retention_policy(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::new(self.retention_cap)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_cap: DEFAULT_RETENTION_CAP,
        }
    }
}

/// Settings for the built-in evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum samples one query may load before failing.
    pub max_samples: usize,
    /// Wall-clock limit for one evaluation.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// How far back an instant selector searches for a sample.
    #[serde(with = "duration_serde")]
    pub lookback_delta: Duration,
}

impl EngineConfig {
    /// Validates the engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEngineOption`] if any limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_samples == 0 {
            return Err(ConfigError::InvalidEngineOption {
                reason: "max_samples must be > 0".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidEngineOption {
                reason: "timeout must be > 0".to_string(),
            });
        }
        if self.lookback_delta.is_zero() {
            return Err(ConfigError::InvalidEngineOption {
                reason: "lookback_delta must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
            timeout: DEFAULT_TIMEOUT,
            lookback_delta: DEFAULT_LOOKBACK_DELTA,
        }
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.retention_cap, 1000);
        assert_eq!(config.engine.max_samples, 50_000_000);
        assert_eq!(config.engine.timeout, Duration::from_secs(300));
        assert_eq!(config.engine.lookback_delta, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "store": { "retention_cap": 5 }, "engine": { "timeout": 1.5 } }"#)
                .unwrap();
        assert_eq!(config.store.retention_cap, 5);
        assert_eq!(config.engine.timeout, Duration::from_millis(1500));
        assert_eq!(config.engine.lookback_delta, DEFAULT_LOOKBACK_DELTA);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<Config, _> = serde_json::from_str(r#"{ "engine": { "timeout": -1 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let config = StoreConfig { retention_cap: 0 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetentionCap { cap: 0 })
        ));

        let engine = EngineConfig {
            max_samples: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            engine.validate(),
            Err(ConfigError::InvalidEngineOption { .. })
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promsnap.json");
        std::fs::write(&path, r#"{ "store": { "retention_cap": 10 } }"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.store.retention_cap, 10);

        std::fs::write(&path, r#"{ "store": { "retention_cap": 0 } }"#).unwrap();
        assert!(matches!(
            Config::from_json_file(&path),
            Err(ConfigError::InvalidRetentionCap { .. })
        ));

        assert!(matches!(
            Config::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
