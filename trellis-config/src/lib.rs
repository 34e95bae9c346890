//! Configuration management for Trellis servers.
//!
//! [`ServerConfig`] carries every tunable of a running server. Values are
//! layered: built-in defaults, then an optional file (JSON, TOML or `.env`,
//! detected from the extension), then `TRELLIS_*` environment variables. The
//! merged result is validated before it is handed out.
//!
//! ```
//! use trellis_config::ServerConfig;
//!
//! let config = ServerConfig::default();
//! assert_eq!(config.bind_addr(), "0.0.0.0:8080");
//! assert_eq!(config.task_capacity, 10);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `TRELLIS_PORT=9000`.
pub const ENV_PREFIX: &str = "TRELLIS_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "plain", "pretty", "compact"];

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
    /// HTTP/1 header read timeout
    pub read_timeout_secs: u64,
    /// Upper bound for producing a response
    pub write_timeout_secs: u64,
    /// Maximum number of background tasks running at once
    pub task_capacity: usize,
    /// How long each background task works
    pub task_duration_ms: u64,
    /// Time allowed for connections and tasks to drain on shutdown
    pub grace_period_secs: u64,
    /// Directory served under `/swagger/`
    pub swagger_dir: String,
    /// `info.title` of the generated API document
    pub api_title: String,
    /// `info.version` of the generated API document
    pub api_version: String,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout_secs: 5,
            write_timeout_secs: 10,
            task_capacity: 10,
            task_duration_ms: 2000,
            grace_period_secs: 5,
            swagger_dir: "swagger-ui".to_string(),
            api_title: "Trellis API".to_string(),
            api_version: "1.0.0".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

/// Insert one layered setting.
///
/// Text from `.env` files and environment variables is parsed as a number or
/// boolean only when the field it replaces is one; string fields keep the raw
/// text, so `TRELLIS_API_VERSION=2` stays `"2"`.
fn merge_setting(merged: &mut Map<String, Value>, key: String, value: Value) {
    let value = match value {
        Value::String(raw) if matches!(merged.get(&key), Some(v) if !v.is_string()) => {
            env::coerce_scalar(&raw)
        }
        other => other,
    };
    merged.insert(key, value);
}

impl ServerConfig {
    /// Load configuration from defaults, an optional file and the process
    /// environment (including a `.env` file in the working directory, if any).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok(); // Ignore if .env doesn't exist
        let env_vars = EnvLoader::new(Some(ENV_PREFIX.to_string())).load();
        Self::load_with_env(path, env_vars)
    }

    /// Same as [`ServerConfig::load`] with an explicit, already-normalized set
    /// of environment overrides (keys as produced by [`EnvLoader::collect`]).
    pub fn load_with_env(path: Option<&Path>, env_vars: HashMap<String, String>) -> Result<Self> {
        let mut merged = Self::default().to_map()?;

        if let Some(path) = path {
            match ConfigLoader::auto(path)?.load_file(path)? {
                Value::Object(map) => {
                    for (key, value) in map {
                        merge_setting(&mut merged, key, value);
                    }
                }
                other => {
                    return Err(ConfigError::Malformed(format!(
                        "{} must contain a table of settings, found {}",
                        path.display(),
                        other
                    )));
                }
            }
        }

        for (key, value) in env_vars {
            merge_setting(&mut merged, key, Value::String(value));
        }

        Self::from_value(Value::Object(merged))
    }

    /// Deserialize and validate a configuration value
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| ConfigError::MistypedSetting(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::Encoding(
                "server configuration did not serialize to an object".to_string(),
            )),
            Err(e) => Err(ConfigError::Encoding(e.to_string())),
        }
    }

    /// `host:port` suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn task_duration(&self) -> Duration {
        Duration::from_millis(self.task_duration_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.host, "host")?;
        ConfigValidator::at_least(self.read_timeout_secs, 1, "read_timeout_secs")?;
        ConfigValidator::at_least(self.write_timeout_secs, 1, "write_timeout_secs")?;
        ConfigValidator::at_least(self.task_capacity, 1, "task_capacity")?;
        ConfigValidator::at_least(self.task_duration_ms, 1, "task_duration_ms")?;
        ConfigValidator::at_least(self.grace_period_secs, 1, "grace_period_secs")?;
        ConfigValidator::not_empty(&self.swagger_dir, "swagger_dir")?;
        ConfigValidator::not_empty(&self.api_title, "api_title")?;
        ConfigValidator::not_empty(&self.api_version, "api_version")?;
        ConfigValidator::one_of(&self.log_level, LOG_LEVELS, "log_level")?;
        ConfigValidator::one_of(&self.log_format, LOG_FORMATS, "log_format")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_duration(), Duration::from_secs(2));
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut env = HashMap::new();
        env.insert("port".to_string(), "9090".to_string());
        env.insert("task_capacity".to_string(), "3".to_string());
        env.insert("api_title".to_string(), "Pets".to_string());

        let config = ServerConfig::load_with_env(None, env).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.task_capacity, 3);
        assert_eq!(config.api_title, "Pets");
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut env = HashMap::new();
        env.insert("task_capacity".to_string(), "0".to_string());

        let err = ServerConfig::load_with_env(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting(_)));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let config = ServerConfig {
            log_format: "xml".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_type_is_deserialization_error() {
        let mut env = HashMap::new();
        env.insert("port".to_string(), "eighty".to_string());

        let err = ServerConfig::load_with_env(None, env).unwrap_err();
        assert!(matches!(err, ConfigError::MistypedSetting(_)));
    }
}
