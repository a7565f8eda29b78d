//! The single RPC error kind and its HTTP rendering.
//!
//! Every pipeline failure reaches the caller as `Aborted(cause)`: HTTP 409
//! (the HTTP mapping of gRPC `ABORTED`) with a JSON body
//! `{"code": "aborted", "message": "<cause>"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// RPC status codes. Only `Aborted` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCode {
    Aborted,
}

impl RpcCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            RpcCode::Aborted => StatusCode::CONFLICT,
        }
    }
}

/// Error body returned by both services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            code: RpcCode::Aborted,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for RpcStatus {
    fn from(err: PipelineError) -> Self {
        RpcStatus::aborted(err.to_string())
    }
}

impl IntoResponse for RpcStatus {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self)).into_response()
    }
}
