//! Configuration management for pushkeep
//!
//! Handles loading and validation of pushkeep.toml configuration files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delivery::NotificationDefaults;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::metadata::DEFAULT_METADATA_KEY;
use crate::vapid::ApplicationServerKey;

/// Config file name under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "pushkeep.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Push and relay settings
    #[serde(default)]
    pub push: PushConfig,

    /// Notification fallbacks
    #[serde(default)]
    pub notifications: NotificationDefaults,

    /// Worker-local storage
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

/// Push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Application server public key (URL-safe base64)
    #[serde(default)]
    pub vapid_public_key: String,

    /// Renewal relay endpoint; when unset the worker writes to the store directly
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Relay request timeout in milliseconds
    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_public_key: String::new(),
            relay_url: None,
            relay_timeout_ms: default_relay_timeout(),
        }
    }
}

impl PushConfig {
    #[must_use]
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

fn default_relay_timeout() -> u64 {
    10_000
}

/// Worker storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory for worker-local state; in-memory when unset
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Storage key of the renewal metadata slot
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            metadata_key: default_metadata_key(),
        }
    }
}

fn default_metadata_key() -> String {
    DEFAULT_METADATA_KEY.to_string()
}

/// Output format for logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

impl Config {
    /// Default config path (`<config dir>/pushkeep/pushkeep.toml`)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pushkeep").join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location, or defaults when no file exists
    pub fn load() -> crate::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse TOML text
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// Check values that can only be wrong, not merely unset
    pub fn validate(&self) -> crate::Result<()> {
        if !self.push.vapid_public_key.is_empty() {
            ApplicationServerKey::from_base64url(&self.push.vapid_public_key).map_err(|e| {
                ConfigError::ValidationError(format!("push.vapid_public_key: {e}"))
            })?;
        }
        if let Some(url) = &self.push.relay_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| ConfigError::ValidationError(format!("push.relay_url: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::ValidationError(format!(
                    "push.relay_url: unsupported scheme {}",
                    parsed.scheme()
                ))
                .into());
            }
        }
        if self.push.relay_timeout_ms == 0 {
            return Err(
                ConfigError::ValidationError("push.relay_timeout_ms must be > 0".into()).into(),
            );
        }
        if self.notifications.default_title.trim().is_empty()
            || self.notifications.default_body.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "notifications.default_title and default_body must not be empty".into(),
            )
            .into());
        }
        if self.worker.metadata_key.is_empty() {
            return Err(
                ConfigError::ValidationError("worker.metadata_key must not be empty".into()).into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::vapid::test_key;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.push.relay_timeout_ms, 10_000);
        assert_eq!(config.worker.metadata_key, "push-metadata");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml(&format!(
            r#"
[push]
vapid_public_key = "{}"
relay_url = "https://api.example.com/push/renew"

[notifications]
default_title = "Budget"

[logging]
format = "json"
"#,
            test_key()
        ))
        .unwrap();
        assert_eq!(config.push.relay_timeout(), Duration::from_secs(10));
        assert_eq!(config.notifications.default_title, "Budget");
        assert_eq!(config.notifications.default_url, "/");
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = Config::default();
        config.push.vapid_public_key = "short".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::ValidationError(_)))
        ));

        let mut config = Config::default();
        config.push.relay_url = Some("ftp://relay".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notifications.default_body = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_reads_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[worker]\nmetadata_key = \"renewal\"").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.worker.metadata_key, "renewal");

        let missing = Config::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::Config(ConfigError::FileNotFound(_)))));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[push"),
            Err(Error::Config(ConfigError::ParseError(_)))
        ));
    }
}
