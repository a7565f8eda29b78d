//! Recording provider for tests and dry runs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{DeliveryProvider, OutboundEmail, ProviderResponse};
use crate::error::PipelineError;

/// Provider that records every message instead of sending it.
///
/// Clones share the same record. [`MockProvider::fail_with`] makes every
/// following send fail; failed sends are not recorded.
#[derive(Clone, Default)]
pub struct MockProvider {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().await = Some(reason.into());
    }

    pub async fn recover(&self) {
        *self.failure.lock().await = None;
    }

    /// Messages accepted so far, in send order.
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }

    /// Recipients of the accepted messages, in send order.
    pub async fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|email| email.to.email.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, PipelineError> {
        if let Some(reason) = self.failure.lock().await.clone() {
            return Err(PipelineError::delivery(reason));
        }

        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        info!(to = %email.to.email, sent_count = sent.len(), "mock_send_recorded");

        Ok(ProviderResponse {
            status: 202,
            message_id: Some(format!("mock-{}", sent.len())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmailTemplate;

    #[tokio::test]
    async fn test_records_and_fails() {
        let provider = MockProvider::new();
        let email = EmailTemplate::default().compose("s@example.com", "r@example.com", "body");

        let response = provider.send(&email).await.unwrap();
        assert_eq!(response.message_id.as_deref(), Some("mock-1"));

        provider.fail_with("quota exceeded").await;
        let err = provider.send(&email).await.unwrap_err();
        assert_eq!(err.to_string(), "delivery failed: quota exceeded");

        assert_eq!(provider.recipients().await, vec!["r@example.com"]);
    }
}
