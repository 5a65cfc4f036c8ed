use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use magia_relay_server::config::Settings;
use magia_relay_server::server::{create_app, AppState};
use magia_relay_server::shutdown::shutdown_signal;
use magia_relay_server::tasks::HeartbeatTask;
use magia_relay_server::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.logging);
    tracing::info!(
        admin_token_required = settings.relay.admin_token.is_some(),
        "Configuration loaded"
    );

    // Create application state
    let state = AppState::new(settings.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start heartbeat task in background
    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    let registry = state.registry.clone();
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Magia Relay Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, registry))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
