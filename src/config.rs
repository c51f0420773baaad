//! Configuration management for Warden.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::ratelimit::{Limit, StrategyKind};

/// Main configuration for Warden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// When false every request is admitted without counting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Counting strategy for every bucket
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Limits applied to every request
    #[serde(default)]
    pub global: LimitsConfig,

    /// Limits keyed by route name
    #[serde(default)]
    pub routes: HashMap<String, LimitsConfig>,

    /// Escalation settings; no jail when absent
    #[serde(default)]
    pub jail: Option<JailConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            strategy: StrategyKind::default(),
            global: LimitsConfig::default(),
            routes: HashMap::new(),
            jail: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A list of limits for one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Limits in declaration order
    #[serde(default)]
    pub limits: Vec<Limit>,

    /// Only charge requests whose response status is 400 or above
    #[serde(default)]
    pub only_count_failed: bool,
}

/// Jail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailConfig {
    /// How many rate-limit violations lead to a ban
    #[serde(default)]
    pub limits: Vec<Limit>,

    /// Log every newly jailed range
    #[serde(default = "default_log_reports")]
    pub log_reports: bool,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            limits: Vec::new(),
            log_reports: default_log_reports(),
        }
    }
}

fn default_log_reports() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `warden=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WardenError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert!(config.enabled);
        assert_eq!(config.strategy, StrategyKind::MovingWindow);
        assert!(config.global.limits.is_empty());
        assert!(config.jail.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = WardenConfig::from_yaml("{}").unwrap();
        assert!(config.enabled);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
enabled: true
strategy: moving_window
global:
  limits: ["100/1m", "5/1s"]
routes:
  api.login:
    limits: ["5/1m"]
    only_count_failed: true
  api.search:
    limits:
      - requests: 30
        window: 10
jail:
  limits: ["3/1h"]
logging:
  level: debug
  json: true
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();

        assert_eq!(
            config.global.limits,
            vec![Limit::new(100, 60), Limit::new(5, 1)]
        );
        assert!(!config.global.only_count_failed);

        let login = &config.routes["api.login"];
        assert_eq!(login.limits, vec![Limit::new(5, 60)]);
        assert!(login.only_count_failed);
        assert_eq!(config.routes["api.search"].limits, vec![Limit::new(30, 10)]);

        let jail = config.jail.unwrap();
        assert_eq!(jail.limits, vec![Limit::new(3, 3600)]);
        assert!(jail.log_reports);

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_limit_is_config_error() {
        let yaml = r#"
global:
  limits: ["5/1fortnight"]
"#;
        let err = WardenConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        assert!(WardenConfig::from_yaml("strategy: token_bucket").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = WardenConfig::from_file("/nonexistent/warden.yaml").unwrap_err();
        assert!(matches!(err, WardenError::Io(_)));
    }
}
