//! Errors raised while assembling server settings

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported settings file {}: expected a .json, .toml or .env file", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Malformed settings: {0}")]
    Malformed(String),

    /// A setting has the right type but an unusable value
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// A setting could not be read as the type its field expects
    #[error("Mistyped setting: {0}")]
    MistypedSetting(String),

    #[error("Cannot encode settings: {0}")]
    Encoding(String),

    #[error("Environment variable {key} unavailable: {source}")]
    MissingVar {
        key: String,
        #[source]
        source: std::env::VarError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
