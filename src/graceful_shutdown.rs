//! Shutdown signal handling

use tokio::signal;

/// Resolve when the process is asked to stop
///
/// Completes on Ctrl+C, or on SIGTERM where that exists. `axum::serve`
/// stops accepting connections once this resolves.
pub async fn handler() {
    let interrupt = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received, draining connections");
}
