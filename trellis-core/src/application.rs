//! Server lifecycle and HTTP glue

use crate::dispatcher::Dispatcher;
use crate::docs::api_document;
use crate::logging::{debug, error, info, warn};
use crate::middleware::{HandlerFn, HandlerFuture, MiddlewareChain};
use crate::registry::Registry;
use crate::shutdown::{ConnectionGauge, shutdown_signal};
use crate::static_files::{OPENAPI_PATH, SWAGGER_PREFIX, SwaggerFiles};
use crate::tasks::TaskPool;
use crate::{Error, HttpRequest, HttpResponse};
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, body::Incoming as IncomingBody};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use trellis_config::ServerConfig;

/// Where an [`Application`] is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Stopped => "stopped",
        })
    }
}

/// Everything a connection needs to answer requests.
///
/// The middleware chain inside is frozen when this is built.
#[derive(Clone)]
pub struct RequestHandler {
    chain: MiddlewareChain,
    write_timeout: Duration,
}

impl RequestHandler {
    /// Run a request through the chain, turning every failure into an
    /// error envelope
    pub async fn handle(&self, req: HttpRequest) -> HttpResponse {
        let (method, path) = (req.method.clone(), req.path.clone());

        let err = match tokio::time::timeout(self.write_timeout, self.chain.call(req)).await {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => e,
            Err(_) => Error::HandlerTimeout(self.write_timeout),
        };

        if err.is_client_error() {
            debug!(method = %method, path = %path, error = %err, "Request failed");
        } else {
            error!(method = %method, path = %path, error = %err, "Request failed");
        }
        err.to_response()
    }

    /// Names of the middleware wrapping every request
    pub fn middleware_names(&self) -> &[String] {
        self.chain.names()
    }

    async fn handle_hyper(
        &self,
        req: Request<IncomingBody>,
        remote: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let response = match into_http_request(req, remote).await {
            Ok(req) => self.handle(req).await,
            Err(e) => e.to_response(),
        };
        into_hyper_response(response)
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("middleware", &self.chain.names())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// An embeddable server around a [`Registry`].
///
/// Lifecycle: `Created → Running → ShuttingDown → Stopped`, exactly once.
///
/// ```no_run
/// use std::sync::Arc;
/// use trellis_core::{Application, Registry, ServerConfig};
///
/// # async fn run() -> trellis_core::Result<()> {
/// let registry = Arc::new(Registry::new());
/// registry.register_middleware("logging", true);
/// registry.register_route("/hello", "GET", "Hi there", "greets the caller");
///
/// Application::new(registry, ServerConfig::default()).listen().await
/// # }
/// ```
pub struct Application {
    registry: Arc<Registry>,
    config: ServerConfig,
    tasks: Arc<TaskPool>,
    connections: ConnectionGauge,
    state: AtomicU8,
}

impl Application {
    pub fn new(registry: Arc<Registry>, config: ServerConfig) -> Self {
        let tasks = TaskPool::new(config.task_capacity, config.task_duration());
        Self {
            registry,
            config,
            tasks,
            connections: ConnectionGauge::new(),
            state: AtomicU8::new(LifecycleState::Created as u8),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskPool> {
        &self.tasks
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Freeze the registry's current middleware around the router.
    ///
    /// Middleware registered after this call does not affect the result.
    pub fn build_handler(&self) -> RequestHandler {
        let middleware = self.registry.middleware();
        let chain = MiddlewareChain::build(&middleware, self.router());

        info!(middleware = ?chain.names(), "Middleware chain installed");

        RequestHandler {
            chain,
            write_timeout: self.config.write_timeout(),
        }
    }

    /// `GET /openapi.json`, `GET /swagger/*`, and dynamic routes for the rest
    fn router(&self) -> HandlerFn {
        let registry = self.registry.clone();
        let dispatch = Dispatcher::new(self.registry.clone(), self.tasks.clone()).into_handler();
        let swagger = Arc::new(
            SwaggerFiles::new(&self.config.swagger_dir).with_title(self.config.api_title.clone()),
        );
        let title = Arc::new(self.config.api_title.clone());
        let version = Arc::new(self.config.api_version.clone());

        Arc::new(move |req: HttpRequest| -> HandlerFuture {
            if req.method == "GET" && req.path == OPENAPI_PATH {
                let registry = registry.clone();
                let (title, version) = (title.clone(), version.clone());
                return Box::pin(async move {
                    let spec = api_document(&registry, &title, &version);
                    HttpResponse::ok().with_json(&spec)
                });
            }
            if req.method == "GET" && req.path.starts_with(SWAGGER_PREFIX) {
                let swagger = swagger.clone();
                return Box::pin(async move { swagger.serve(&req.path).await });
            }
            dispatch(req)
        })
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM
    pub async fn listen(&self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// drain within the configured grace period.
    ///
    /// Fails with [`Error::AlreadyStarted`] unless the application is still
    /// in [`LifecycleState::Created`].
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        self.state
            .compare_exchange(
                LifecycleState::Created as u8,
                LifecycleState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|current| Error::AlreadyStarted(LifecycleState::from(current).to_string()))?;

        let handler = Arc::new(self.build_handler());
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Server running on http://{}", local_addr);
        info!("API docs available at http://{}{}", local_addr, SWAGGER_PREFIX);

        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout());
        let graceful = GracefulShutdown::new();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let guard = self.connections.open();

                    let handler = handler.clone();
                    let service = service_fn(move |req| {
                        let handler = handler.clone();
                        async move { Ok::<_, Infallible>(handler.handle_hyper(req, remote).await) }
                    });
                    let conn = graceful.watch(http.serve_connection(TokioIo::new(stream), service));

                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            debug!(remote = %remote, error = %err, "Error serving connection");
                        }
                        drop(guard);
                    });
                }
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        self.set_state(LifecycleState::ShuttingDown);
        info!("Shutting down server...");

        self.tasks.cancel();

        let grace = self.config.grace_period();
        let drained = tokio::time::timeout(grace, async {
            tokio::join!(graceful.shutdown(), self.tasks.wait(grace))
        })
        .await
        .is_ok();

        if !drained {
            error!(
                grace_period = ?grace,
                connections = self.connections.active_count(),
                tasks = self.tasks.stats().running,
                "Server shutdown error: grace period exceeded"
            );
        }

        self.set_state(LifecycleState::Stopped);
        info!("Server stopped");
        Ok(())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn into_http_request(
    req: Request<IncomingBody>,
    remote: SocketAddr,
) -> Result<HttpRequest, Error> {
    let (parts, body) = req.into_parts();

    let mut request =
        HttpRequest::new(parts.method.as_str(), parts.uri.path()).with_remote_addr(remote);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let body = body
        .collect()
        .await
        .map_err(|e| Error::BadRequest(format!("Failed to read request body: {}", e)))?;
    request.body = body.to_bytes().to_vec();

    Ok(request)
}

fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in &response.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }

    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|e| {
            error!(error = %e, "Invalid response");
            let mut fallback = Response::new(Full::new(Bytes::from_static(
                br#"{"error":"Internal server error"}"#,
            )));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        let registry = Arc::new(Registry::new());
        registry.register_route("/hello", "GET", "Hi there", "greets the caller");
        let config = ServerConfig {
            task_duration_ms: 10,
            swagger_dir: "does-not-exist".to_string(),
            ..ServerConfig::default()
        };
        Application::new(registry, config)
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            LifecycleState::Created,
            LifecycleState::Running,
            LifecycleState::ShuttingDown,
            LifecycleState::Stopped,
        ] {
            assert_eq!(LifecycleState::from(state as u8), state);
        }
        assert_eq!(LifecycleState::ShuttingDown.to_string(), "shutting down");
    }

    #[tokio::test]
    async fn test_handler_routes_builtin_endpoints() {
        let app = app();
        let handler = app.build_handler();

        let doc = handler.handle(HttpRequest::new("GET", "/openapi.json")).await;
        assert_eq!(doc.status, 200);
        assert_eq!(doc.json_value().unwrap()["paths"]["/hello"]["get"]["summary"], "greets the caller");

        let ui = handler.handle(HttpRequest::new("GET", "/swagger/")).await;
        assert_eq!(ui.status, 200);

        let hello = handler.handle(HttpRequest::new("GET", "/hello")).await;
        assert_eq!(hello.status, 200);
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let handler = RequestHandler {
            chain: MiddlewareChain::build(
                &[],
                Arc::new(|_req: HttpRequest| -> HandlerFuture {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(HttpResponse::ok())
                    })
                }),
            ),
            write_timeout: Duration::from_millis(20),
        };

        let response = handler.handle(HttpRequest::new("GET", "/slow")).await;
        assert_eq!(response.status, 503);
    }

    #[test]
    fn test_invalid_status_falls_back() {
        let response = into_hyper_response(HttpResponse::new(1000));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
