//! RPC endpoint handlers.
//!
//! Each handler decodes the request, calls its service and maps any failure
//! to [`RpcStatus`]. A handler runs as its own task per request; if the caller
//! goes away, the handler future is dropped along with any pending consume.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::rpc::status::RpcStatus;
use crate::service::{DispatchRequest, DispatchService, EnqueueService};

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// EmailService/Enqueue
// =============================================================================

/// Enqueue request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub recipient: String,
}

/// Enqueue response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub message: String,
}

/// Enqueue endpoint.
pub async fn enqueue(
    State(service): State<EnqueueService>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, RpcStatus> {
    info!(recipient = %request.recipient, "rpc_enqueue_received");

    match service.enqueue(&request.recipient).await {
        Ok(ack) => Ok(Json(EnqueueResponse {
            message: ack.message,
        })),
        Err(e) => {
            warn!(recipient = %request.recipient, error_kind = e.kind(), "rpc_enqueue_aborted");
            Err(e.into())
        }
    }
}

// =============================================================================
// SendGridService/Dispatch
// =============================================================================

/// Dispatch request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub sender: String,
    pub body: String,
}

/// Dispatch response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub message: String,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// Dispatch endpoint.
///
/// May wait indefinitely when the queue is empty.
pub async fn dispatch(
    State(service): State<DispatchService>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>, RpcStatus> {
    info!(
        sender = %request.sender,
        body_length = request.body.len(),
        "rpc_dispatch_received"
    );

    let request = DispatchRequest::new(request.sender, request.body);

    match service.dispatch(&request).await {
        Ok(ack) => Ok(Json(SendResponse {
            message: ack.message,
            recipient: ack.recipient,
            provider_message_id: ack.provider_message_id,
        })),
        Err(e) => {
            warn!(sender = %request.sender, error_kind = e.kind(), "rpc_dispatch_aborted");
            Err(e.into())
        }
    }
}
