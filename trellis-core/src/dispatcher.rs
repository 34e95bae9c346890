//! Terminal handler resolving requests against the registry

use crate::logging::{error, info};
use crate::middleware::{HandlerFn, HandlerFuture};
use crate::registry::{Registry, RouteKey};
use crate::tasks::{TaskIdGenerator, TaskPool};
use crate::{Error, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;

/// Body of a successful dispatch
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<'a> {
    pub message: &'a str,
    pub background_task: BackgroundTask<'a>,
}

#[derive(Debug, Serialize)]
pub struct BackgroundTask<'a> {
    pub message: String,
    pub task_id: &'a str,
}

/// Looks up `(path, METHOD)`, answers with the route's message and starts
/// one background task per match
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    tasks: Arc<TaskPool>,
    ids: Arc<TaskIdGenerator>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, tasks: Arc<TaskPool>) -> Self {
        Self {
            registry,
            tasks,
            ids: Arc::new(TaskIdGenerator::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<TaskPool> {
        &self.tasks
    }

    /// Resolve one request.
    ///
    /// The background task is spawned only after the response body has been
    /// encoded, and the response never waits for it.
    pub fn dispatch(&self, req: &HttpRequest) -> Result<HttpResponse, Error> {
        let key = RouteKey::new(req.path.as_str(), &req.method);

        let Some(route) = self.registry.lookup_route(&key.path, &key.method) else {
            let hint = self.registry.find_any_method_for_path(&key.path);
            let err = Error::RouteNotFound {
                method: key.method,
                path: key.path,
                hint,
            };
            info!(path = %req.path, method = %req.method, "{}", err);
            return Err(err);
        };

        let task_id = self.ids.next_id();
        let envelope = SuccessEnvelope {
            message: &route.message,
            background_task: BackgroundTask {
                message: format!("Task started in background: {}", task_id),
                task_id: task_id.as_str(),
            },
        };

        let response = HttpResponse::ok().with_json(&envelope).map_err(|e| {
            error!(path = %route.path, method = %route.method, error = %e, "Failed to encode response");
            e
        })?;

        info!(
            path = %route.path,
            method = %route.method,
            task_id = %task_id,
            "Route matched"
        );
        self.tasks.spawn(task_id);

        Ok(response)
    }

    /// Like [`Dispatcher::dispatch`], with errors rendered as envelopes
    pub fn respond(&self, req: &HttpRequest) -> HttpResponse {
        self.dispatch(req).unwrap_or_else(|e| e.to_response())
    }

    /// The dispatcher as the innermost handler of a middleware chain
    pub fn into_handler(self) -> HandlerFn {
        let dispatcher = Arc::new(self);
        Arc::new(move |req: HttpRequest| -> HandlerFuture {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.dispatch(&req) })
        })
    }
}
