//! Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all environment variables matching the prefix
    pub fn load(&self) -> HashMap<String, String> {
        self.collect(env::vars())
    }

    /// Filter and normalize an explicit set of variables.
    ///
    /// Keys keep only the part after the prefix, lowercased, so
    /// `TRELLIS_TASK_CAPACITY` becomes `task_capacity`.
    pub fn collect<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = HashMap::new();

        for (key, value) in vars {
            if let Some(ref prefix) = self.prefix {
                if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                    let trimmed_key = rest.trim_start_matches('_');
                    if !trimmed_key.is_empty() {
                        config.insert(trimmed_key.to_lowercase(), value);
                    }
                }
            } else {
                config.insert(key.to_lowercase(), value);
            }
        }

        config
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = if let Some(ref prefix) = self.prefix {
            format!("{}_{}", prefix.trim_end_matches('_'), key.to_uppercase())
        } else {
            key.to_uppercase()
        };

        env::var(&full_key).map_err(|source| ConfigError::MissingVar {
            key: full_key.clone(),
            source,
        })
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Interpret a raw string as a JSON scalar when it parses as one.
///
/// Numbers and booleans become typed values; anything else (including JSON
/// objects and arrays) stays a string.
pub fn coerce_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}
