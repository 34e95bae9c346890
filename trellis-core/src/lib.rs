//! Core of Trellis: an embeddable HTTP server whose routes, middleware and
//! dependency values are registered at runtime.
//!
//! - [`Registry`] stores routes, the middleware sequence and dependencies
//! - [`MiddlewareChain`] folds the registered middleware around the router
//! - [`Dispatcher`] answers matched routes and starts a background task each
//! - [`TaskPool`] bounds how many background tasks run at once
//! - [`api_document`] describes the live route table as OpenAPI
//! - [`Application`] owns the listener and the graceful shutdown sequence
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{Application, HttpRequest, Registry, ServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Arc::new(Registry::new());
//! registry.register_route("/hello", "GET", "Hi there", "greets the caller");
//!
//! let app = Application::new(registry, ServerConfig::default());
//! let handler = app.build_handler();
//!
//! let response = handler.handle(HttpRequest::new("POST", "/hello")).await;
//! assert_eq!(response.status, 404);
//! # }
//! ```

pub mod application;
pub mod dispatcher;
pub mod docs;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod registry;
pub mod shutdown;
pub mod static_files;
pub mod tasks;

pub use application::{Application, LifecycleState, RequestHandler};
pub use dispatcher::Dispatcher;
pub use docs::api_document;
pub use error::{Error, Result};
pub use http::{HttpRequest, HttpResponse};
pub use middleware::{
    CorsMiddleware, HandlerFn, HandlerFuture, LoggingMiddleware, Middleware, MiddlewareChain,
    MiddlewareEntry, Next, RequestIdMiddleware, SecurityHeadersMiddleware,
};
pub use registry::{MiddlewareCatalog, Parameter, Registry, Route, RouteKey};
pub use shutdown::{ConnectionGauge, shutdown_signal};
pub use static_files::SwaggerFiles;
pub use tasks::{TaskId, TaskIdGenerator, TaskOutcome, TaskPool, TaskStats};

pub use trellis_config::ServerConfig;
pub use trellis_openapi::ParameterLocation;
