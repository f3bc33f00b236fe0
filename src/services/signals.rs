use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::services::manager::ServiceManager;

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for Ctrl+C");
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
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run until a shutdown signal arrives or a service exits, then stop everything.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let exit = tokio::select! {
        _ = shutdown_signal() => ExitCode::SUCCESS,
        Some((name, result)) = service_manager.next_exit() => {
            match result {
                Ok(()) => warn!(service = name, "Service exited unexpectedly"),
                Err(e) => error!(service = name, error = ?e, "Service failed"),
            }
            ExitCode::FAILURE
        }
    };

    if service_manager.shutdown(shutdown_timeout).await {
        info!("Shutdown complete");
        exit
    } else {
        ExitCode::FAILURE
    }
}
