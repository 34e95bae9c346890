//! Dispatch Benchmarks
//!
//! Registry lookups, direct dispatch and the full middleware-wrapped handler.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use trellis::{Application, Dispatcher, HttpRequest, Registry, ServerConfig, TaskPool};

fn populated_registry(routes: usize) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    for i in 0..routes {
        registry.register_route(&format!("/resource/{}", i), "GET", "ok", "bench route");
    }
    registry
}

// =============================================================================
// Registry Benchmarks
// =============================================================================

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    for size in [10usize, 100, 1000] {
        let registry = populated_registry(size);
        let hit = format!("/resource/{}", size / 2);

        group.bench_with_input(BenchmarkId::new("lookup_hit", size), &hit, |b, path| {
            b.iter(|| black_box(registry.lookup_route(path, "GET")))
        });

        group.bench_with_input(BenchmarkId::new("method_hint", size), &hit, |b, path| {
            b.iter(|| black_box(registry.find_any_method_for_path(path)))
        });
    }

    group.bench_function("register_route", |b| {
        let registry = Registry::new();
        b.iter(|| registry.register_route("/bench", "POST", "ok", "re-registered"))
    });

    group.finish();
}

// =============================================================================
// Dispatch Benchmarks
// =============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let registry = populated_registry(100);
    let tasks = TaskPool::new(1024, Duration::from_millis(1));
    let dispatcher = Dispatcher::new(registry.clone(), tasks);

    let mut group = c.benchmark_group("dispatch");

    group.bench_function("matched", |b| {
        let req = HttpRequest::new("GET", "/resource/50");
        b.iter(|| black_box(dispatcher.respond(&req)))
    });

    group.bench_function("not_found_with_hint", |b| {
        let req = HttpRequest::new("DELETE", "/resource/50");
        b.iter(|| black_box(dispatcher.respond(&req)))
    });

    group.bench_function("not_found", |b| {
        let req = HttpRequest::new("GET", "/missing");
        b.iter(|| black_box(dispatcher.respond(&req)))
    });

    group.finish();

    dispatcher.tasks().cancel();
}

fn bench_handler(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let registry = populated_registry(100);
    for name in ["logging", "request_id", "security_headers"] {
        registry.register_middleware(name, true);
    }
    let config = ServerConfig {
        task_capacity: 1024,
        task_duration_ms: 1,
        ..ServerConfig::default()
    };
    let app = Application::new(registry, config);
    let handler = app.build_handler();

    let mut group = c.benchmark_group("handler");

    group.bench_function("middleware_chain", |b| {
        b.to_async(&rt)
            .iter(|| handler.handle(HttpRequest::new("GET", "/resource/50")))
    });

    group.bench_function("openapi_document", |b| {
        b.to_async(&rt)
            .iter(|| handler.handle(HttpRequest::new("GET", "/openapi.json")))
    });

    group.finish();

    app.tasks().cancel();
}

criterion_group!(benches, bench_registry, bench_dispatch, bench_handler);
criterion_main!(benches);
