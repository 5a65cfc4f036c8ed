//! Graceful shutdown handling.
//!
//! Waits for Ctrl+C or SIGTERM, then stops background tasks and asks every
//! live connection to close so the server can drain.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;

use crate::connection_manager::ConnectionRegistry;

/// Resolve once a termination signal arrives, after notifying the rest of the process
pub async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>, registry: Arc<ConnectionRegistry>) {
    wait_for_signal().await;
    begin_shutdown(&shutdown_tx, &registry);
}

/// Notify background tasks and close every live connection
pub fn begin_shutdown(shutdown_tx: &broadcast::Sender<()>, registry: &ConnectionRegistry) -> usize {
    let _ = shutdown_tx.send(());

    let connections = registry.all();
    for handle in &connections {
        handle.request_close();
    }

    tracing::info!(connections = connections.len(), "Closing live connections for shutdown");
    connections.len()
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
