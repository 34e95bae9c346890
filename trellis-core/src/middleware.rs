//! Middleware system for request/response processing

use crate::logging::{debug, error, info, trace, warn};
use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Future returned by every handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for the next handler in the middleware chain
pub type Next = Box<dyn FnOnce(HttpRequest) -> HandlerFuture + Send>;

/// Type alias for handler functions
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// A middleware registered under a name
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub name: String,
    pub middleware: Arc<dyn Middleware>,
}

impl std::fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Wrap `inner` so that `middleware` runs around it
pub fn wrap(middleware: Arc<dyn Middleware>, inner: HandlerFn) -> HandlerFn {
    Arc::new(move |req: HttpRequest| -> HandlerFuture {
        let middleware = middleware.clone();
        let inner = inner.clone();
        Box::pin(async move {
            middleware
                .handle(req, Box::new(move |req| inner(req)))
                .await
        })
    })
}

/// A handler composed once from a fixed middleware sequence.
///
/// `entries[0]` is outermost: it sees the request first and the response last.
/// Registrations made after the chain is built do not affect it.
#[derive(Clone)]
pub struct MiddlewareChain {
    names: Arc<Vec<String>>,
    handler: HandlerFn,
}

impl MiddlewareChain {
    /// Fold `entries` right-to-left around `terminal`
    pub fn build(entries: &[MiddlewareEntry], terminal: HandlerFn) -> Self {
        let handler = entries
            .iter()
            .rev()
            .fold(terminal, |next, entry| wrap(entry.middleware.clone(), next));
        let names = entries.iter().map(|entry| entry.name.clone()).collect();

        trace!(middleware_count = entries.len(), "Middleware chain built");

        Self {
            names: Arc::new(names),
            handler,
        }
    }

    /// Names of the wrapped middleware, outermost first
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn handler(&self) -> HandlerFn {
        self.handler.clone()
    }

    pub async fn call(&self, req: HttpRequest) -> Result<HttpResponse, Error> {
        (self.handler)(req).await
    }
}

/// Render a downstream failure as its error envelope.
///
/// Header-adding middleware uses this so error responses carry the same
/// headers as successful ones.
pub fn settle(result: Result<HttpResponse, Error>) -> HttpResponse {
    result.unwrap_or_else(|e| {
        if e.is_client_error() {
            debug!(error = %e, "Request failed");
        } else {
            error!(error = %e, "Request failed");
        }
        e.to_response()
    })
}

// ========== Built-in Middleware ==========

/// Logs one line per request with method, path, remote address, status and
/// elapsed time
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let method = req.method.clone();
        let path = req.path.clone();
        let remote = req.remote_display();

        let result = next(req).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => info!(
                method = %method,
                path = %path,
                remote_addr = %remote,
                status = response.status,
                elapsed_us = elapsed.as_micros() as u64,
                "{} {} from {} in {:?}",
                method,
                path,
                remote,
                elapsed
            ),
            Err(e) => warn!(
                method = %method,
                path = %path,
                remote_addr = %remote,
                status = e.status_code(),
                elapsed_us = elapsed.as_micros() as u64,
                error = %e,
                "{} {} from {} in {:?}",
                method,
                path,
                remote,
                elapsed
            ),
        }

        result
    }
}

/// Propagates `x-request-id`, generating one when the client sent none
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(&self, mut req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let request_id = req
            .header("x-request-id")
            .cloned()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        req.headers
            .insert("x-request-id".to_string(), request_id.clone());

        let mut response = settle(next(req).await);
        response
            .headers
            .insert("x-request-id".to_string(), request_id);

        Ok(response)
    }
}

/// Security headers middleware
#[derive(Debug, Clone)]
pub struct SecurityHeadersMiddleware {
    hsts_enabled: bool,
    frame_options: Option<String>,
}

impl SecurityHeadersMiddleware {
    pub fn new() -> Self {
        Self {
            hsts_enabled: false,
            frame_options: Some("DENY".to_string()),
        }
    }

    /// Only meaningful behind TLS termination
    pub fn with_hsts(mut self, enabled: bool) -> Self {
        self.hsts_enabled = enabled;
        self
    }

    pub fn with_frame_options(mut self, value: &str) -> Self {
        self.frame_options = Some(value.to_string());
        self
    }
}

impl Default for SecurityHeadersMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for SecurityHeadersMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let mut response = settle(next(req).await);

        if self.hsts_enabled {
            response.headers.insert(
                "Strict-Transport-Security".to_string(),
                "max-age=31536000; includeSubDomains".to_string(),
            );
        }
        response
            .headers
            .insert("X-Content-Type-Options".to_string(), "nosniff".to_string());
        response
            .headers
            .insert("X-XSS-Protection".to_string(), "1; mode=block".to_string());
        if let Some(frame_opts) = &self.frame_options {
            response
                .headers
                .insert("X-Frame-Options".to_string(), frame_opts.clone());
        }

        Ok(response)
    }
}

/// CORS (Cross-Origin Resource Sharing) middleware
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
    pub max_age: u32,
}

impl CorsMiddleware {
    pub fn new() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS, PATCH".to_string(),
            allow_headers: "Content-Type, Authorization, Accept".to_string(),
            max_age: 86400, // 24 hours
        }
    }

    pub fn allow_origin(mut self, origin: &str) -> Self {
        self.allow_origin = origin.to_string();
        self
    }
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for CorsMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        // Preflight never reaches the dispatcher
        if req.method == "OPTIONS" && req.header("access-control-request-method").is_some() {
            return Ok(HttpResponse::no_content()
                .with_header("Access-Control-Allow-Origin", self.allow_origin.clone())
                .with_header("Access-Control-Allow-Methods", self.allow_methods.clone())
                .with_header("Access-Control-Allow-Headers", self.allow_headers.clone())
                .with_header("Access-Control-Max-Age", self.max_age.to_string()));
        }

        let mut response = settle(next(req).await);
        response.headers.insert(
            "Access-Control-Allow-Origin".to_string(),
            self.allow_origin.clone(),
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn ok_handler() -> HandlerFn {
        Arc::new(|_req: HttpRequest| -> HandlerFuture { Box::pin(async { Ok(HttpResponse::ok()) }) })
    }

    fn ok_next() -> Next {
        Box::new(|_req: HttpRequest| -> HandlerFuture { Box::pin(async { Ok(HttpResponse::ok()) }) })
    }

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            self.log.lock().push(format!("{} in", self.label));
            let response = next(req).await;
            self.log.lock().push(format!("{} out", self.label));
            response
        }
    }

    fn entry(name: &str, middleware: impl Middleware + 'static) -> MiddlewareEntry {
        MiddlewareEntry {
            name: name.to_string(),
            middleware: Arc::new(middleware),
        }
    }

    #[tokio::test]
    async fn test_first_registered_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entries = vec![
            entry("a", Recorder { label: "a", log: log.clone() }),
            entry("b", Recorder { label: "b", log: log.clone() }),
        ];

        let chain = MiddlewareChain::build(&entries, ok_handler());
        assert_eq!(chain.names(), ["a".to_string(), "b".to_string()]);

        let response = chain.call(HttpRequest::new("GET", "/")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(*log.lock(), vec!["a in", "b in", "b out", "a out"]);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_terminal() {
        let chain = MiddlewareChain::build(&[], ok_handler());
        assert!(chain.names().is_empty());
        assert!(chain.call(HttpRequest::new("GET", "/")).await.is_ok());
    }

    #[tokio::test]
    async fn test_logging_middleware_passes_errors_through() {
        let failing: Next = Box::new(|_req: HttpRequest| -> HandlerFuture {
            Box::pin(async { Err(Error::NotFound("missing".to_string())) })
        });
        let result = LoggingMiddleware
            .handle(HttpRequest::new("GET", "/missing"), failing)
            .await;
        assert_eq!(result.unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_request_id_generated() {
        let response = RequestIdMiddleware
            .handle(HttpRequest::new("GET", "/test"), ok_next())
            .await
            .unwrap();
        let id = response.header("x-request-id").unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_propagated() {
        let req = HttpRequest::new("GET", "/test").with_header("X-Request-Id", "abc-123");
        let seen = Arc::new(Mutex::new(None));
        let seen_inner = seen.clone();
        let next: Next = Box::new(move |req: HttpRequest| -> HandlerFuture {
            *seen_inner.lock() = req.header("x-request-id").cloned();
            Box::pin(async { Ok(HttpResponse::ok()) })
        });

        let response = RequestIdMiddleware.handle(req, next).await.unwrap();
        assert_eq!(seen.lock().as_deref(), Some("abc-123"));
        assert_eq!(
            response.header("x-request-id").map(String::as_str),
            Some("abc-123")
        );
    }

    #[tokio::test]
    async fn test_security_headers_middleware() {
        let response = SecurityHeadersMiddleware::new()
            .handle(HttpRequest::new("GET", "/"), ok_next())
            .await
            .unwrap();

        assert_eq!(
            response.header("X-Content-Type-Options").map(String::as_str),
            Some("nosniff")
        );
        assert_eq!(
            response.header("X-Frame-Options").map(String::as_str),
            Some("DENY")
        );
        assert!(response.header("Strict-Transport-Security").is_none());
    }

    #[tokio::test]
    async fn test_cors_adds_origin() {
        let response = CorsMiddleware::new()
            .allow_origin("https://example.com")
            .handle(HttpRequest::new("GET", "/api"), ok_next())
            .await
            .unwrap();

        assert_eq!(
            response.header("Access-Control-Allow-Origin").map(String::as_str),
            Some("https://example.com")
        );
    }

    fn not_found_next() -> Next {
        Box::new(|_req: HttpRequest| -> HandlerFuture {
            Box::pin(async {
                Err(Error::RouteNotFound {
                    method: "POST".to_string(),
                    path: "/hello".to_string(),
                    hint: Some("GET".to_string()),
                })
            })
        })
    }

    #[tokio::test]
    async fn test_headers_added_to_error_responses() {
        let req = || HttpRequest::new("POST", "/hello").with_header("x-request-id", "req-404");

        let response = RequestIdMiddleware.handle(req(), not_found_next()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.header("x-request-id").map(String::as_str), Some("req-404"));

        let response = SecurityHeadersMiddleware::new()
            .handle(req(), not_found_next())
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(
            response.header("X-Content-Type-Options").map(String::as_str),
            Some("nosniff")
        );

        let response = CorsMiddleware::new().handle(req(), not_found_next()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(
            response.header("Access-Control-Allow-Origin").map(String::as_str),
            Some("*")
        );
        assert_eq!(
            response.json_value().unwrap()["error"],
            "Route not found for POST /hello - Try using method GET"
        );
    }

    #[tokio::test]
    async fn test_cors_preflight_short_circuits() {
        let req = HttpRequest::new("OPTIONS", "/api")
            .with_header("Access-Control-Request-Method", "POST");
        let never: Next = Box::new(|_req: HttpRequest| -> HandlerFuture {
            Box::pin(async { Err(Error::BadRequest("reached handler".to_string())) })
        });

        let response = CorsMiddleware::new().handle(req, never).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(response.header("Access-Control-Allow-Methods").is_some());
        assert_eq!(
            response.header("Access-Control-Max-Age").map(String::as_str),
            Some("86400")
        );
    }
}
