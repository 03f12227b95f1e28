//! Discovery Server - HTTP and WebSocket surface for the discovery council
//!
//! The server provides:
//! - REST API for initialization, sessions, cycles and exploration
//! - A WebSocket feed of every deliberation event
//! - An auto-cycle timer driving cycles while a session is active

pub mod auto_cycle;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::build_router;
pub use state::{AppState, StateSnapshot};

use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bind `addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Discovery server listening");

    let app = build_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Discovery server shutting down");
    state.stop_auto().await;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received terminate signal, initiating graceful shutdown"),
    }
}
