//! TOML route manifest.
//!
//! A manifest lists the routes, middleware and dependencies a process
//! registers before it starts serving:
//!
//! ```toml
//! [[routes]]
//! path = "/hello"
//! method = "GET"
//! message = "Hi there"
//! description = "Greets the caller"
//!
//! [[routes.parameters]]
//! name = "name"
//! in = "query"
//! description = "Who to greet"
//!
//! [routes.responses]
//! 404 = "No greeting today"
//!
//! [[middleware]]
//! name = "logging"
//!
//! [[dependencies]]
//! name = "database_url"
//! value = "postgres://localhost/app"
//! ```
//!
//! Applying a manifest goes through the same registration calls any embedder
//! would make, so malformed routes are logged and skipped by the registry.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use trellis_core::{Parameter, ParameterLocation, Registry, Route};

/// Manifest loading errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid response status '{status}' for {method} {path}")]
    InvalidStatus {
        method: String,
        path: String,
        status: String,
    },
}

/// Everything a process registers at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub routes: Vec<RouteEntry>,
    pub middleware: Vec<MiddlewareToggle>,
    pub dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteEntry {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub message: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    /// Extra documented responses keyed by status code
    #[serde(default)]
    pub responses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    #[serde(rename = "in", default = "default_location")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MiddlewareToggle {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    pub value: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_location() -> ParameterLocation {
    ParameterLocation::Query
}

fn default_param_type() -> String {
    "string".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Manifest {
    /// Parse a manifest from TOML text
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(content)?;
        for route in &manifest.routes {
            route.statuses()?;
        }
        Ok(manifest)
    }

    /// Read and parse a manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Register every entry with `registry`.
    ///
    /// Dependencies go first, then middleware in listed order, then routes.
    pub fn apply(&self, registry: &Registry) {
        for dependency in &self.dependencies {
            registry.register_dependency(&dependency.name, &dependency.value);
        }
        for middleware in &self.middleware {
            registry.register_middleware(&middleware.name, middleware.enabled);
        }
        for route in &self.routes {
            registry.register(route.to_route());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.middleware.is_empty() && self.dependencies.is_empty()
    }
}

impl RouteEntry {
    fn statuses(&self) -> Result<Vec<(u16, &str)>, ManifestError> {
        self.responses
            .iter()
            .map(|(status, description)| {
                status
                    .trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|code| (100..=599).contains(code))
                    .map(|code| (code, description.as_str()))
                    .ok_or_else(|| ManifestError::InvalidStatus {
                        method: self.method.clone(),
                        path: self.path.clone(),
                        status: status.clone(),
                    })
            })
            .collect()
    }

    /// Build the registry route; statuses were checked by [`Manifest::parse`]
    fn to_route(&self) -> Route {
        let mut route = Route::new(
            self.path.clone(),
            &self.method,
            self.message.clone(),
            self.description.clone(),
        );
        for param in &self.parameters {
            route = route.with_parameter(
                Parameter::new(param.name.clone(), param.location)
                    .description(param.description.clone())
                    .required(param.required)
                    .param_type(param.param_type.clone()),
            );
        }
        for (status, description) in self.statuses().unwrap_or_default() {
            route = route.with_response(status, description);
        }
        route
    }
}
