//! Shutdown plumbing
//!
//! [`ConnectionGauge`] counts open connections for shutdown reporting.
//! [`shutdown_signal`] resolves on SIGINT or SIGTERM (Ctrl-C elsewhere).

use crate::logging::{error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of connections currently being served
#[derive(Debug, Clone, Default)]
pub struct ConnectionGauge {
    active: Arc<AtomicU64>,
}

impl ConnectionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection until the returned guard drops
    pub fn open(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active: self.active.clone(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves when the process is asked to stop
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
