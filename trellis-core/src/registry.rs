//! Runtime registry of routes, middleware and dependency values
//!
//! The three stores are locked independently, so registering a dependency
//! never blocks route lookups. Locks are held only for the map access
//! itself and never across an `.await`.
//!
//! Registration is fire-and-forget: malformed input is logged and ignored.
//!
//! ```
//! use trellis_core::Registry;
//!
//! let registry = Registry::new();
//! registry.register_route("/hello", "get", "Hi there", "greets the caller");
//! registry.register_route("", "GET", "ignored", "");
//!
//! let route = registry.lookup_route("/hello", "GET").unwrap();
//! assert_eq!(route.message, "Hi there");
//! assert_eq!(registry.route_count(), 1);
//! ```

use crate::logging::{debug, info, warn};
use crate::middleware::{
    CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareEntry, RequestIdMiddleware,
    SecurityHeadersMiddleware,
};
use crate::Error;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use trellis_openapi::ParameterLocation;

/// Description given to the `200` response of every new route
pub const DEFAULT_RESPONSE_DESCRIPTION: &str = "Successful response";

/// Documented route parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub description: String,
    pub required: bool,
    /// Schema type name, e.g. `string` or `integer`
    pub param_type: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParameterLocation) -> Self {
        Self {
            name: name.into(),
            location,
            description: String::new(),
            required: false,
            param_type: "string".to_string(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn param_type(mut self, param_type: impl Into<String>) -> Self {
        self.param_type = param_type.into();
        self
    }
}

/// Key of a route: path plus uppercase method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub path: String,
    pub method: String,
}

impl RouteKey {
    pub fn new(path: impl Into<String>, method: &str) -> Self {
        Self {
            path: path.into(),
            method: method.to_ascii_uppercase(),
        }
    }
}

/// A registered route and its documentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    /// Always uppercase once registered
    pub method: String,
    pub message: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    /// Status code to response description; always contains 200
    pub responses: BTreeMap<u16, String>,
}

impl Route {
    pub fn new(
        path: impl Into<String>,
        method: &str,
        message: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let mut responses = BTreeMap::new();
        responses.insert(200, DEFAULT_RESPONSE_DESCRIPTION.to_string());
        Self {
            path: path.into(),
            method: method.to_ascii_uppercase(),
            message: message.into(),
            description: description.into(),
            parameters: Vec::new(),
            responses,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_response(mut self, status: u16, description: impl Into<String>) -> Self {
        self.responses.insert(status, description.into());
        self
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.path.clone(), &self.method)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.path.is_empty() {
            return Err(Error::InvalidRegistration("route path is empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(Error::InvalidRegistration(format!(
                "route path {:?} must start with '/'",
                self.path
            )));
        }
        if self.method.is_empty() {
            return Err(Error::InvalidRegistration(format!(
                "route {} has no method",
                self.path
            )));
        }
        if http::Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(Error::InvalidRegistration(format!(
                "{:?} is not a valid HTTP method",
                self.method
            )));
        }
        if self.message.is_empty() {
            return Err(Error::InvalidRegistration(format!(
                "route {} {} has no message",
                self.method, self.path
            )));
        }
        Ok(())
    }
}

/// Middleware implementations known by name
#[derive(Clone)]
pub struct MiddlewareCatalog {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareCatalog {
    /// A catalog with nothing in it
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// `logging`, `request_id`, `security_headers` and `cors`
    pub fn builtin() -> Self {
        Self::empty()
            .with("logging", LoggingMiddleware)
            .with("request_id", RequestIdMiddleware)
            .with("security_headers", SecurityHeadersMiddleware::new())
            .with("cors", CorsMiddleware::new())
    }

    /// Add or replace a named implementation
    pub fn with<M: Middleware + 'static>(mut self, name: impl Into<String>, middleware: M) -> Self {
        self.entries.insert(name.into(), Arc::new(middleware));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Known names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MiddlewareCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for MiddlewareCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareCatalog")
            .field("names", &self.names())
            .finish()
    }
}

/// Concurrent store of routes, middleware and dependencies
#[derive(Debug)]
pub struct Registry {
    routes: RwLock<HashMap<RouteKey, Route>>,
    middleware: RwLock<Vec<MiddlewareEntry>>,
    dependencies: RwLock<HashMap<String, String>>,
    catalog: MiddlewareCatalog,
}

impl Registry {
    /// A registry with the built-in middleware catalog
    pub fn new() -> Self {
        Self::with_catalog(MiddlewareCatalog::builtin())
    }

    pub fn with_catalog(catalog: MiddlewareCatalog) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
            dependencies: RwLock::new(HashMap::new()),
            catalog,
        }
    }

    pub fn catalog(&self) -> &MiddlewareCatalog {
        &self.catalog
    }

    /// Register a route answering with `message` and a single `200` response.
    ///
    /// The method is uppercased. A route already stored under the same path
    /// and method is replaced.
    pub fn register_route(&self, path: &str, method: &str, message: &str, description: &str) {
        self.register(Route::new(path, method, message, description));
    }

    /// Register a fully described route (parameters, extra responses)
    pub fn register(&self, mut route: Route) {
        route.method = route.method.to_ascii_uppercase();
        route
            .responses
            .entry(200)
            .or_insert_with(|| DEFAULT_RESPONSE_DESCRIPTION.to_string());

        if let Err(e) = route.validate() {
            warn!(path = %route.path, method = %route.method, "{}", e);
            return;
        }

        let key = route.key();
        let (method, path) = (route.method.clone(), route.path.clone());
        let replaced = self.routes.write().insert(key, route).is_some();

        info!(method = %method, path = %path, replaced, "Route registered");
    }

    /// Append a middleware from the catalog to the chain.
    ///
    /// Disabled entries and unknown names are logged and skipped.
    pub fn register_middleware(&self, name: &str, enabled: bool) {
        if !enabled {
            info!(name = %name, "Middleware disabled, skipping");
            return;
        }

        let Some(middleware) = self.catalog.get(name) else {
            warn!(
                name = %name,
                known = ?self.catalog.names(),
                "{}",
                Error::UnknownMiddleware(name.to_string())
            );
            return;
        };

        let mut chain = self.middleware.write();
        chain.push(MiddlewareEntry {
            name: name.to_string(),
            middleware,
        });
        let position = chain.len();
        drop(chain);

        info!(name = %name, position, "Middleware registered");
    }

    /// Store a dependency value, replacing any previous one
    pub fn register_dependency(&self, name: &str, value: &str) {
        if name.is_empty() {
            warn!("{}", Error::InvalidRegistration("dependency name is empty".to_string()));
            return;
        }

        self.dependencies
            .write()
            .insert(name.to_string(), value.to_string());

        // values may be secrets; only the name is logged
        info!(name = %name, "Dependency registered");
    }

    pub fn dependency(&self, name: &str) -> Option<String> {
        self.dependencies.read().get(name).cloned()
    }

    /// Exact match on path and (case-insensitive) method
    pub fn lookup_route(&self, path: &str, method: &str) -> Option<Route> {
        self.routes.read().get(&RouteKey::new(path, method)).cloned()
    }

    /// Some method registered for `path`, if any.
    ///
    /// When several exist the alphabetically first is returned, so the
    /// answer is stable.
    pub fn find_any_method_for_path(&self, path: &str) -> Option<String> {
        let found = self
            .routes
            .read()
            .keys()
            .filter(|key| key.path == path)
            .map(|key| key.method.clone())
            .min();
        debug!(path = %path, method = ?found, "Alternate method lookup");
        found
    }

    /// Point-in-time copy of every route, sorted by path then method
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.routes.read().values().cloned().collect();
        routes.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
        routes
    }

    /// Point-in-time copy of the middleware sequence, in registration order
    pub fn middleware(&self) -> Vec<MiddlewareEntry> {
        self.middleware.read().clone()
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.middleware
            .read()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Registered dependency names, sorted
    pub fn dependency_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dependencies.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.read().len()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.read().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_route_has_default_response() {
        let route = Route::new("/a", "get", "msg", "");
        assert_eq!(route.method, "GET");
        assert_eq!(route.responses.get(&200).map(String::as_str), Some("Successful response"));
        assert!(route.parameters.is_empty());
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let registry = Registry::new();
        registry.register_route("/a", "pAtCh", "patched", "");

        assert!(registry.lookup_route("/a", "PATCH").is_some());
        assert!(registry.lookup_route("/a", "patch").is_some());
        assert!(registry.lookup_route("/a", "GET").is_none());
    }

    #[test]
    fn test_rejects_malformed_routes() {
        let registry = Registry::new();
        registry.register_route("", "GET", "m", "");
        registry.register_route("no-slash", "GET", "m", "");
        registry.register_route("/a", "", "m", "");
        registry.register_route("/a", "GE T", "m", "");
        registry.register_route("/a", "GET", "", "");

        assert_eq!(registry.route_count(), 0);
    }

    #[test]
    fn test_empty_description_allowed() {
        let registry = Registry::new();
        registry.register_route("/a", "GET", "m", "");
        assert_eq!(registry.route_count(), 1);
    }

    #[test]
    fn test_custom_method_token() {
        let registry = Registry::new();
        registry.register_route("/sync", "PROPFIND", "ok", "");
        assert!(registry.lookup_route("/sync", "propfind").is_some());
    }

    #[test]
    fn test_register_keeps_documentation() {
        let registry = Registry::new();
        let route = Route::new("/items", "GET", "items", "lists items")
            .with_parameter(
                Parameter::new("limit", ParameterLocation::Query)
                    .param_type("integer")
                    .description("page size"),
            )
            .with_response(400, "Bad limit");
        registry.register(route);

        let stored = registry.lookup_route("/items", "GET").unwrap();
        assert_eq!(stored.parameters.len(), 1);
        assert_eq!(stored.parameters[0].param_type, "integer");
        assert_eq!(stored.responses.len(), 2);
    }

    #[test]
    fn test_register_restores_missing_success_response() {
        let registry = Registry::new();
        let mut route = Route::new("/a", "GET", "m", "");
        route.responses.clear();
        registry.register(route);

        let stored = registry.lookup_route("/a", "GET").unwrap();
        assert!(stored.responses.contains_key(&200));
    }

    #[test]
    fn test_find_any_method_is_stable() {
        let registry = Registry::new();
        registry.register_route("/a", "PUT", "m", "");
        registry.register_route("/a", "DELETE", "m", "");
        registry.register_route("/b", "GET", "m", "");

        assert_eq!(registry.find_any_method_for_path("/a").as_deref(), Some("DELETE"));
        assert_eq!(registry.find_any_method_for_path("/c"), None);
    }

    #[test]
    fn test_dependencies() {
        let registry = Registry::new();
        registry.register_dependency("db", "postgres://one");
        registry.register_dependency("db", "postgres://two");
        registry.register_dependency("", "ignored");

        assert_eq!(registry.dependency("db").as_deref(), Some("postgres://two"));
        assert_eq!(registry.dependency("missing"), None);
        assert_eq!(registry.dependency_names(), vec!["db".to_string()]);
    }

    #[test]
    fn test_middleware_registration() {
        let registry = Registry::new();
        registry.register_middleware("logging", true);
        registry.register_middleware("cors", false);
        registry.register_middleware("compression", true);
        registry.register_middleware("request_id", true);

        assert_eq!(registry.middleware_names(), vec!["logging", "request_id"]);
    }

    #[test]
    fn test_catalog_extension() {
        let catalog = MiddlewareCatalog::builtin().with("audit", LoggingMiddleware);
        assert!(catalog.contains("audit"));
        assert_eq!(
            catalog.names(),
            vec!["audit", "cors", "logging", "request_id", "security_headers"]
        );

        let registry = Registry::with_catalog(catalog);
        registry.register_middleware("audit", true);
        assert_eq!(registry.middleware_count(), 1);
    }
}
