use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::{
    Application, Error, HttpRequest, HttpResponse, Middleware, MiddlewareCatalog, Next, Registry,
    ServerConfig,
};

/// Appends its tag to a shared trace on the way in and out
struct Tag {
    tag: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Tag {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        self.trace.lock().push(format!(">{}", self.tag));
        let mut response = next(req).await?;
        self.trace.lock().push(format!("<{}", self.tag));
        response
            .headers
            .insert(format!("x-{}", self.tag), "seen".to_string());
        Ok(response)
    }
}

fn tagged_registry(trace: &Arc<Mutex<Vec<String>>>) -> Arc<Registry> {
    let catalog = MiddlewareCatalog::builtin()
        .with("outer", Tag { tag: "outer", trace: trace.clone() })
        .with("inner", Tag { tag: "inner", trace: trace.clone() });
    let registry = Arc::new(Registry::with_catalog(catalog));
    registry.register_route("/hello", "GET", "Hi there", "");
    registry
}

#[tokio::test]
async fn test_registration_order_is_wrapping_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let registry = tagged_registry(&trace);
    registry.register_middleware("outer", true);
    registry.register_middleware("inner", true);

    let handler = Application::new(registry, ServerConfig::default()).build_handler();
    assert_eq!(handler.middleware_names(), ["outer".to_string(), "inner".to_string()]);

    let response = handler.handle(HttpRequest::new("GET", "/hello")).await;
    assert_eq!(response.status, 200);
    assert_eq!(*trace.lock(), vec![">outer", ">inner", "<inner", "<outer"]);
}

#[tokio::test]
async fn test_chain_is_frozen_at_build() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let registry = tagged_registry(&trace);
    registry.register_middleware("outer", true);

    let app = Application::new(registry.clone(), ServerConfig::default());
    let handler = app.build_handler();
    registry.register_middleware("inner", true);

    let response = handler.handle(HttpRequest::new("GET", "/hello")).await;
    assert!(response.header("x-outer").is_some());
    assert!(response.header("x-inner").is_none());

    // a rebuilt handler picks up the new registration
    let rebuilt = app.build_handler();
    let response = rebuilt.handle(HttpRequest::new("GET", "/hello")).await;
    assert!(response.header("x-inner").is_some());
}

#[tokio::test]
async fn test_middleware_sees_not_found() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let registry = tagged_registry(&trace);
    registry.register_middleware("security_headers", true);
    registry.register_middleware("outer", true);

    let handler = Application::new(registry, ServerConfig::default()).build_handler();
    let response = handler.handle(HttpRequest::new("POST", "/hello")).await;

    assert_eq!(response.status, 404);
    // errors short-circuit the `?` in Tag, so only the way in is recorded
    assert_eq!(*trace.lock(), vec![">outer"]);
    assert!(response.header("x-outer").is_none());
    // security_headers wraps Tag and still decorates the 404 envelope
    assert_eq!(
        response.header("x-content-type-options").map(String::as_str),
        Some("nosniff")
    );
}

#[tokio::test]
async fn test_builtin_middleware_through_handler() {
    let registry = Arc::new(Registry::new());
    registry.register_route("/hello", "GET", "Hi there", "");
    for name in ["logging", "request_id", "security_headers", "cors", "gzip"] {
        registry.register_middleware(name, true);
    }

    let handler = Application::new(registry, ServerConfig::default()).build_handler();
    assert_eq!(handler.middleware_names().len(), 4);

    let response = handler
        .handle(HttpRequest::new("GET", "/hello").with_header("x-request-id", "req-7"))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-request-id").map(String::as_str), Some("req-7"));
    assert_eq!(
        response.header("x-content-type-options").map(String::as_str),
        Some("nosniff")
    );
    assert_eq!(
        response.header("access-control-allow-origin").map(String::as_str),
        Some("*")
    );

    let missing = handler
        .handle(HttpRequest::new("POST", "/hello").with_header("x-request-id", "req-8"))
        .await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.header("x-request-id").map(String::as_str), Some("req-8"));
    assert_eq!(
        missing.header("x-frame-options").map(String::as_str),
        Some("DENY")
    );
    assert_eq!(
        missing.header("access-control-allow-origin").map(String::as_str),
        Some("*")
    );
    assert_eq!(
        missing.json_value().unwrap()["error"],
        "Route not found for POST /hello - Try using method GET"
    );
}
