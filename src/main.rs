//! Trellis server binary.
//!
//! Loads configuration, registers the routes listed in a TOML manifest and
//! serves them until SIGINT or SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use trellis::logging::LogConfig;
use trellis::{Application, Manifest, Registry, ServerConfig};

/// Trellis - runtime-registered HTTP routes with background tasks
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version)]
#[command(about = "Serve a route manifest with background tasks and OpenAPI docs")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file (JSON, TOML or .env)
    #[arg(short, long, env = "TRELLIS_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Route manifest (TOML)
    #[arg(short, long, env = "TRELLIS_ROUTES_FILE")]
    routes: Option<PathBuf>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // logging is configured from this file, so stderr is all we have
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    let _log_guard = match LogConfig::from_server_config(&config).init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(Registry::new());
    if let Some(path) = &cli.routes {
        match Manifest::load(path) {
            Ok(manifest) => {
                manifest.apply(&registry);
                info!(
                    manifest = %path.display(),
                    routes = registry.route_count(),
                    middleware = registry.middleware_count(),
                    dependencies = registry.dependency_count(),
                    "Route manifest applied"
                );
            }
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    if registry.route_count() == 0 {
        warn!("No routes registered; every dynamic request will return 404");
    }

    let app = Application::new(registry, config);
    match app.listen().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
