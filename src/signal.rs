//! Process signals and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! [`run_until_signal`] reacts by:
//! 1. Immediately stopping `accept` so no new connections are made.
//! 2. Letting every in-flight connection finish within the grace period.
//! 3. Returning once the engine is stopped, which lets `main` exit cleanly.
//!
//! Set `terminationGracePeriodSeconds` in your pod spec to a value longer
//! than `shutdown_grace_ms`.

use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;
use crate::error::Result;

/// Serves `engine` until SIGTERM or Ctrl-C, then stops it within `grace`.
///
/// Returns the first error of `start` or `stop`.
pub async fn run_until_signal<E>(engine: &E, grace: Duration) -> Result<()>
where
    E: Engine + ?Sized,
{
    let start = engine.start();
    tokio::pin!(start);

    tokio::select! {
        result = &mut start => return result,
        () = shutdown_signal() => {
            info!(adapter = engine.name(), "shutdown signal received, draining connections");
        }
    }

    let (started, stopped) = tokio::join!(start, engine.stop(grace));
    started.and(stopped)
}

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves; on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
