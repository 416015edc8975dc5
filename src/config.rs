use serde::Deserialize;
use std::time::Duration;

use tracing::debug;

use crate::errors::{ConfigError, ConfigResult};

/// Daemon configuration, loaded from `$CONFIG_PATH/proxy.toml`.
///
/// Everything has a default; a missing file just means defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub fake: FakeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Period between buffered/raw-attribute reads, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// How many scan records one chunk read may cover.
    #[serde(default = "default_read_records")]
    pub read_records: usize,
}

fn default_interval_ms() -> u64 {
    700
}

fn default_read_records() -> usize {
    127
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            read_records: default_read_records(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Synthetic backends, for exercising the claim logic without hardware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FakeConfig {
    #[serde(default)]
    pub light: bool,
    #[serde(default)]
    pub compass: bool,
}

impl ProxyConfig {
    /// Loads config from TOML file
    pub fn load(path: &str) -> ConfigResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::LoadError {
                    path: path.to_string(),
                    source: e,
                })
            }
        };
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$CONFIG_PATH/proxy.toml`, defaulting the directory to
    /// `config`.
    pub fn from_env() -> ConfigResult<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::load(&format!("{config_path}/proxy.toml"))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll.read_records == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.read_records".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The environment switches the original test tooling used still work.
    pub fn fake_light_enabled(&self) -> bool {
        self.fake.light || std::env::var_os("FAKE_LIGHT_SENSOR").is_some()
    }

    pub fn fake_compass_enabled(&self) -> bool {
        self.fake.compass || std::env::var_os("FAKE_COMPASS").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.poll.interval(), Duration::from_millis(700));
        assert_eq!(config.poll.read_records, 127);
        assert!(!config.fake.light);
        assert!(!config.fake.compass);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [poll]
            interval_ms = 250

            [fake]
            compass = true
            "#,
        )
        .unwrap();
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.poll.read_records, 127);
        assert!(config.fake.compass);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config: ProxyConfig = toml::from_str("[poll]\ninterval_ms = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
