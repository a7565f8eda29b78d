//! Client side of the two RPC services.
//!
//! [`RpcClient`] makes single calls; [`run_batch`] fans a set of calls out
//! concurrently and waits for all of them, keeping each call's outcome
//! separate so one failure never cancels its siblings.

pub mod batch;

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::rpc::{
    EnqueueRequest, EnqueueResponse, RpcStatus, SendRequest, SendResponse, DISPATCH_ROUTE,
    ENQUEUE_ROUTE,
};

pub use batch::{run_batch, BatchReport, CallOutcome};

/// Failure of a single RPC call as seen by the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service ran the call and aborted it.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The call never got a well-formed answer.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with something other than success or abort.
    #[error("unexpected response {status}: {body}")]
    Unexpected { status: StatusCode, body: String },

    #[error("invalid service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Typed client for one service base URL.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    base_url: Url,
}

impl RpcClient {
    /// Create a client for the service at `base_url`.
    ///
    /// No request timeout is set: a dispatch call may legitimately wait
    /// until a recipient is enqueued.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .pool_max_idle_per_host(100)
            .build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    /// `EmailService/Enqueue`.
    pub async fn enqueue(&self, recipient: &str) -> Result<EnqueueResponse, ClientError> {
        let request = EnqueueRequest {
            recipient: recipient.to_string(),
        };
        self.call(ENQUEUE_ROUTE, &request, None).await
    }

    /// `SendGridService/Dispatch`.
    pub async fn dispatch(&self, sender: &str, body: &str) -> Result<SendResponse, ClientError> {
        self.dispatch_within(sender, body, None).await
    }

    /// `SendGridService/Dispatch`, giving up client-side after `timeout`.
    pub async fn dispatch_within(
        &self,
        sender: &str,
        body: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResponse, ClientError> {
        let request = SendRequest {
            sender: sender.to_string(),
            body: body.to_string(),
        };
        self.call(DISPATCH_ROUTE, &request, timeout).await
    }

    async fn call<Req, Resp>(
        &self,
        route: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp, ClientError>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = self.base_url.join(route)?;
        let mut builder = self.client.post(url).json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.json::<Resp>().await?;
            info!(route = route, status_code = status.as_u16(), "rpc_call_complete");
            return Ok(body);
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<RpcStatus>(&text) {
            Ok(rpc_status) => Err(ClientError::Aborted(rpc_status.message)),
            Err(_) => Err(ClientError::Unexpected { status, body: text }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            RpcClient::new("no scheme here"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let client = RpcClient::new("http://127.0.0.1:1").unwrap();
        let err = client.enqueue("x@example.com").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
