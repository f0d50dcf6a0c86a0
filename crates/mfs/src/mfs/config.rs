use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the mutable filesystem.
///
/// Loadable from TOML; every field has a default so a partial file is fine:
///
/// ```toml
/// shard_threshold_bytes = 65536
///
/// [publish]
/// short_delay_ms = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfsConfig {
    /// Once the estimated encoded size of an inline directory
    ///  crosses this many bytes, it is converted to a sharded one
    pub shard_threshold_bytes: usize,
    /// Bits of the name hash consumed per shard level.
    ///  Fan-out of a shard node is `2^shard_width_bits`
    pub shard_width_bits: u8,
    /// Max entries a shard bucket holds before it is split
    ///  into a child shard
    pub shard_bucket_size: usize,
    /// Root publishing behaviour
    pub publish: PublishConfig,
}

impl Default for MfsConfig {
    fn default() -> Self {
        Self {
            shard_threshold_bytes: 256 * 1024,
            shard_width_bits: 8,
            shard_bucket_size: 8,
            publish: PublishConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Coalesce bursts of flushes into a single publish.
    ///  When false every changed flush publishes synchronously
    pub debounce: bool,
    /// Quiet period after the last flush before publishing
    pub short_delay_ms: u64,
    /// Upper bound on how long a pending value may wait
    pub long_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            debounce: true,
            short_delay_ms: 300,
            long_delay_ms: 3000,
        }
    }
}

impl PublishConfig {
    pub fn short_delay(&self) -> Duration {
        Duration::from_millis(self.short_delay_ms)
    }

    pub fn long_delay(&self) -> Duration {
        Duration::from_millis(self.long_delay_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl MfsConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: MfsConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.shard_width_bits) {
            return Err(ConfigError::Invalid(format!(
                "shard_width_bits must be between 1 and 8, got {}",
                self.shard_width_bits
            )));
        }
        if self.shard_bucket_size == 0 {
            return Err(ConfigError::Invalid(
                "shard_bucket_size must be at least 1".to_string(),
            ));
        }
        if self.publish.short_delay_ms > self.publish.long_delay_ms {
            return Err(ConfigError::Invalid(
                "publish.short_delay_ms must not exceed publish.long_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MfsConfig::from_toml(
            r#"
            shard_threshold_bytes = 1024

            [publish]
            short_delay_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.shard_threshold_bytes, 1024);
        assert_eq!(config.shard_width_bits, 8);
        assert_eq!(config.publish.short_delay(), Duration::from_millis(5));
        assert_eq!(config.publish.long_delay(), Duration::from_millis(3000));
        assert!(config.publish.debounce);
    }

    #[test]
    fn test_rejects_bad_width() {
        let result = MfsConfig::from_toml("shard_width_bits = 12");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = MfsConfig::from_toml("shard_width_bits = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            MfsConfig::from_toml("shard_bucket_size = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
