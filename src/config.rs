//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Behaviour, DEFAULT_REQUEST_LIMIT, DEFAULT_WINDOW_SECONDS};

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__LIMITS__REQUEST_LIMIT=50`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration, as written in a file or the environment.
///
/// Limits are signed so that a negative value can be reported instead of
/// failing to parse; see [`LimitsConfig::behaviour`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Attempts allowed per window
    #[serde(default = "default_request_limit")]
    pub request_limit: i64,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,

    #[serde(default)]
    pub store_hostile_ips: bool,

    #[serde(default)]
    pub limit_by_ip: bool,

    #[serde(default = "default_true")]
    pub limit_by_user: bool,

    #[serde(default = "default_true")]
    pub limit_by_endpoint: bool,

    #[serde(default)]
    pub approved_users_only: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            window_seconds: default_window_seconds(),
            store_hostile_ips: false,
            limit_by_ip: false,
            limit_by_user: default_true(),
            limit_by_endpoint: default_true(),
            approved_users_only: false,
        }
    }
}

fn default_request_limit() -> i64 {
    DEFAULT_REQUEST_LIMIT as i64
}

fn default_window_seconds() -> i64 {
    DEFAULT_WINDOW_SECONDS as i64
}

fn default_true() -> bool {
    true
}

impl LimitsConfig {
    /// Validate these limits and turn them into a [`Behaviour`].
    pub fn behaviour(&self) -> Result<Behaviour> {
        let request_limit =
            u32::try_from(self.request_limit).map_err(|_| TurnstileError::InvalidConfiguration {
                field: "request_limit",
                reason: format!("must be between 0 and {}, got {}", u32::MAX, self.request_limit),
            })?;

        let window_seconds =
            u64::try_from(self.window_seconds).map_err(|_| TurnstileError::InvalidConfiguration {
                field: "window_seconds",
                reason: format!("must not be negative, got {}", self.window_seconds),
            })?;

        let behaviour = Behaviour {
            request_limit,
            window_seconds,
            store_hostile_ips: self.store_hostile_ips,
            limit_by_ip: self.limit_by_ip,
            limit_by_user: self.limit_by_user,
            limit_by_endpoint: self.limit_by_endpoint,
            approved_users_only: self.approved_users_only,
        };
        behaviour.validate()?;
        Ok(behaviour)
    }
}

impl TryFrom<&LimitsConfig> for Behaviour {
    type Error = TurnstileError;

    fn try_from(limits: &LimitsConfig) -> Result<Self> {
        limits.behaviour()
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from defaults, an optional YAML file, and
    /// `TURNSTILE__*` environment overrides, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// The rate limiting behaviour described by this configuration.
    pub fn behaviour(&self) -> Result<Behaviour> {
        self.limits.behaviour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_behaviour_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.behaviour().unwrap(), Behaviour::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
limits:
  request_limit: 5
  window_seconds: 2
  limit_by_ip: true
logging:
  format: json
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let behaviour = config.behaviour().unwrap();

        assert_eq!(behaviour.request_limit, 5);
        assert_eq!(behaviour.window_seconds, 2);
        assert!(behaviour.limit_by_ip);
        assert!(behaviour.limit_by_user);
        assert!(behaviour.limit_by_endpoint);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = TurnstileConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TurnstileConfig::default());
    }

    #[test]
    fn test_negative_request_limit_rejected() {
        let yaml = r#"
limits:
  request_limit: -1
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let err = config.behaviour().unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidConfiguration { field: "request_limit", .. }
        ));
    }

    #[test]
    fn test_negative_window_rejected() {
        let limits = LimitsConfig {
            window_seconds: -30,
            ..LimitsConfig::default()
        };
        let err = Behaviour::try_from(&limits).unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::InvalidConfiguration { field: "window_seconds", .. }
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = TurnstileConfig::from_yaml("limits: [").unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "limits:\n  request_limit: 7\n  approved_users_only: true\n",
        )
        .unwrap();

        let config = TurnstileConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limits.request_limit, 7);
        assert!(config.limits.approved_users_only);
        assert_eq!(config.limits.window_seconds, 3600);
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("turnstile-does-not-exist.yaml");
        assert!(TurnstileConfig::load(Some(path.as_path())).is_err());
    }
}
