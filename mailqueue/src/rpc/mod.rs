//! RPC front doors for the two pipeline stages.
//!
//! Both services speak JSON over HTTP, one unary method each:
//! - `POST /EmailService/Enqueue`: publish a recipient
//! - `POST /SendGridService/Dispatch`: consume a recipient and deliver to it
//!
//! Failures are always `409 {"code":"aborted","message":...}`.

pub mod handlers;
pub mod status;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::service::{DispatchService, EnqueueService};

pub use handlers::{
    dispatch, enqueue, health, EnqueueRequest, EnqueueResponse, HealthResponse, SendRequest,
    SendResponse,
};
pub use status::{RpcCode, RpcStatus};

pub const HEALTH_ROUTE: &str = "/health";
pub const ENQUEUE_ROUTE: &str = "/EmailService/Enqueue";
pub const DISPATCH_ROUTE: &str = "/SendGridService/Dispatch";

/// Router for the enqueue service.
pub fn enqueue_router(service: EnqueueService) -> Router {
    Router::new()
        .route(HEALTH_ROUTE, get(health))
        .route(ENQUEUE_ROUTE, post(enqueue))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Router for the dispatch service.
pub fn dispatch_router(service: DispatchService) -> Router {
    Router::new()
        .route(HEALTH_ROUTE, get(health))
        .route(DISPATCH_ROUTE, post(dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Create a future that completes when a shutdown signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("rpc_server_shutting_down");
}
