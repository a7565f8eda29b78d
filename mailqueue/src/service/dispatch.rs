//! Dispatch stage: take one recipient off the queue and deliver to it.
//!
//! A dispatch request carries no recipient of its own. It pairs with whichever
//! job is at the head of the queue when its consumer is served, so under
//! concurrent callers there is no telling which caller's message reaches which
//! recipient.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::provider::{DeliveryOutcome, DeliveryProvider, EmailTemplate};
use crate::queue::{AckPolicy, Broker};

/// Sender and body supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub sender: String,
    pub body: String,
}

impl DispatchRequest {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }
}

/// Acknowledgement for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAck {
    /// Recipient taken from the queue
    pub recipient: String,
    pub message: String,
    /// Identifier assigned by the provider, if any
    pub provider_message_id: Option<String>,
}

/// Consumes one job per call and hands it to the delivery provider.
#[derive(Clone)]
pub struct DispatchService {
    broker: Arc<dyn Broker>,
    provider: Arc<dyn DeliveryProvider>,
    template: Arc<EmailTemplate>,
    ack_policy: AckPolicy,
    max_wait: Option<Duration>,
}

impl DispatchService {
    /// Create a service with the default template, immediate acks and no
    /// consume deadline.
    pub fn new(broker: Arc<dyn Broker>, provider: Arc<dyn DeliveryProvider>) -> Self {
        Self {
            broker,
            provider,
            template: Arc::new(EmailTemplate::default()),
            ack_policy: AckPolicy::default(),
            max_wait: None,
        }
    }

    pub fn with_template(mut self, template: EmailTemplate) -> Self {
        self.template = Arc::new(template);
        self
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    /// Bound the wait for a job. `None` waits until one is published.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Take one recipient and deliver `request` to it.
    ///
    /// Blocks while the queue is empty. Under [`AckPolicy::Immediate`] the job
    /// is gone from the queue before the provider is called, so a failed
    /// delivery loses it.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchAck, PipelineError> {
        let queue = self.broker.queue_name();

        info!(
            queue = %queue,
            sender = %request.sender,
            ack_policy = %self.ack_policy,
            max_wait = ?self.max_wait,
            "dispatch_waiting_for_recipient"
        );

        let claim = match self.broker.consume_within(self.ack_policy, self.max_wait).await {
            Ok(claim) => claim,
            Err(e) => {
                error!(
                    queue = %queue,
                    error = %e,
                    error_kind = e.kind(),
                    "dispatch_consume_failed"
                );
                return Err(e);
            }
        };

        let recipient = claim.job().recipient.clone();
        let email = self
            .template
            .compose(&request.sender, &recipient, &request.body);

        let outcome = DeliveryOutcome::from(self.provider.send(&email).await);

        match outcome {
            DeliveryOutcome::Delivered(response) => {
                if let Err(e) = claim.ack().await {
                    // The email went out; the job may be delivered again.
                    error!(recipient = %recipient, error = %e, "recipient_job_ack_failed");
                }

                info!(
                    recipient = %recipient,
                    provider = self.provider.name(),
                    status_code = response.status,
                    "dispatch_delivered"
                );

                Ok(DispatchAck {
                    message: format!("Successfully sent email to {}", recipient),
                    recipient,
                    provider_message_id: response.message_id,
                })
            }
            DeliveryOutcome::Failed(reason) => {
                match claim.reject().await {
                    Ok(true) => warn!(recipient = %recipient, "recipient_job_requeued"),
                    Ok(false) => warn!(
                        recipient = %recipient,
                        ack_policy = %self.ack_policy,
                        "recipient_job_lost"
                    ),
                    Err(e) => error!(recipient = %recipient, error = %e, "recipient_job_requeue_failed"),
                }

                error!(
                    recipient = %recipient,
                    provider = self.provider.name(),
                    reason = %reason,
                    "dispatch_delivery_failed"
                );

                Err(PipelineError::DeliveryFailed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Instant;

    use super::*;
    use crate::provider::MockProvider;
    use crate::queue::{InMemoryBroker, RecipientJob};
    use crate::service::EnqueueService;

    fn pipeline() -> (InMemoryBroker, MockProvider, EnqueueService, DispatchService) {
        let broker = InMemoryBroker::new("RMQ");
        let provider = MockProvider::new();
        let enqueue = EnqueueService::new(Arc::new(broker.clone()));
        let dispatch = DispatchService::new(Arc::new(broker.clone()), Arc::new(provider.clone()));
        (broker, provider, enqueue, dispatch)
    }

    fn request() -> DispatchRequest {
        DispatchRequest::new("sender@example.com", "Hi from sender, email number is 0")
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_broker, provider, enqueue, dispatch) = pipeline();

        enqueue.enqueue("r@example.com").await.unwrap();
        let ack = dispatch.dispatch(&request()).await.unwrap();

        assert_eq!(ack.recipient, "r@example.com");
        assert_eq!(ack.message, "Successfully sent email to r@example.com");
        assert_eq!(ack.provider_message_id.as_deref(), Some("mock-1"));

        let sent = provider.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from.email, "sender@example.com");
        assert_eq!(sent[0].to.email, "r@example.com");
        assert_eq!(sent[0].text_body, "Hi from sender, email number is 0");
    }

    #[tokio::test]
    async fn test_fifo_single_producer_single_consumer() {
        let (_broker, _provider, enqueue, dispatch) = pipeline();

        enqueue.enqueue("r1@example.com").await.unwrap();
        enqueue.enqueue("r2@example.com").await.unwrap();

        assert_eq!(dispatch.dispatch(&request()).await.unwrap().recipient, "r1@example.com");
        assert_eq!(dispatch.dispatch(&request()).await.unwrap().recipient, "r2@example.com");
    }

    #[tokio::test]
    async fn test_failed_delivery_loses_job_under_immediate_ack() {
        let (broker, provider, enqueue, dispatch) = pipeline();

        enqueue.enqueue("lost@example.com").await.unwrap();
        enqueue.enqueue("next@example.com").await.unwrap();
        provider.fail_with("provider down").await;

        let err = dispatch.dispatch(&request()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DeliveryFailed(_)));
        assert_eq!(broker.pending().await, vec!["next@example.com"]);

        provider.recover().await;
        let ack = dispatch.dispatch(&request()).await.unwrap();
        assert_eq!(ack.recipient, "next@example.com");
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_delivery_requeues_under_on_delivery_success() {
        let (broker, provider, enqueue, dispatch) = pipeline();
        let dispatch = dispatch.with_ack_policy(AckPolicy::OnDeliverySuccess);

        enqueue.enqueue("kept@example.com").await.unwrap();
        provider.fail_with("provider down").await;

        assert!(dispatch.dispatch(&request()).await.is_err());
        assert_eq!(broker.pending().await, vec!["kept@example.com"]);

        provider.recover().await;
        let ack = dispatch.dispatch(&request()).await.unwrap();
        assert_eq!(ack.recipient, "kept@example.com");
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_blocks_until_enqueue() {
        let (_broker, _provider, enqueue, dispatch) = pipeline();
        let delay = Duration::from_millis(200);
        let started = Instant::now();

        let pending = tokio::spawn(async move { dispatch.dispatch(&request()).await });

        tokio::time::sleep(delay).await;
        assert!(!pending.is_finished());
        enqueue.enqueue("late@example.com").await.unwrap();

        let ack = pending.await.unwrap().unwrap();
        assert_eq!(ack.recipient, "late@example.com");
        assert!(started.elapsed() >= delay);
    }

    #[tokio::test]
    async fn test_bounded_wait_times_out() {
        let (_broker, provider, _enqueue, dispatch) = pipeline();
        let dispatch = dispatch.with_max_wait(Some(Duration::from_millis(30)));

        let err = dispatch.dispatch(&request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::ConsumeTimedOut(_)));
        assert!(provider.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_wait_delivers_job_taken_before_deadline() {
        let (broker, provider, enqueue, dispatch) = pipeline();
        let dispatch = dispatch.with_max_wait(Some(Duration::from_millis(20)));

        enqueue.enqueue("slow-ack@example.com").await.unwrap();
        broker.delay_settlement(Duration::from_millis(50)).await;

        let ack = dispatch.dispatch(&request()).await.unwrap();

        assert_eq!(ack.recipient, "slow-ack@example.com");
        assert_eq!(provider.recipients().await, vec!["slow-ack@example.com"]);
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_broker_failure_is_surfaced() {
        let (broker, provider, _enqueue, dispatch) = pipeline();
        broker.fail_with("channel closed").await;

        let err = dispatch.dispatch(&request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::BrokerUnavailable(_)));
        assert!(provider.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_batch_drains_exact_set() {
        let (broker, provider, enqueue, dispatch) = pipeline();
        let recipients: HashSet<String> = (0..50).map(|i| format!("user{}@example.com", i)).collect();

        let publishes = recipients.iter().cloned().map(|r| {
            let enqueue = enqueue.clone();
            tokio::spawn(async move { enqueue.enqueue(&r).await })
        });
        for result in futures::future::join_all(publishes).await {
            result.unwrap().unwrap();
        }
        assert_eq!(broker.len().await, recipients.len());

        let dispatches = (0..recipients.len()).map(|_| {
            let dispatch = dispatch.clone();
            tokio::spawn(async move { dispatch.dispatch(&request()).await })
        });
        let drained: HashSet<String> = futures::future::join_all(dispatches)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap().recipient)
            .collect();

        assert_eq!(drained, recipients);
        assert_eq!(provider.sent().await.len(), recipients.len());
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_template_is_applied() {
        let (broker, provider, _enqueue, dispatch) = pipeline();
        let dispatch = dispatch.with_template(EmailTemplate {
            sender_name: "Ops".to_string(),
            recipient_name: "Customer".to_string(),
            subject: "Status".to_string(),
            html_body: "<p>status</p>".to_string(),
        });
        broker.publish(&RecipientJob::new("c@example.com")).await.unwrap();

        dispatch.dispatch(&request()).await.unwrap();

        let sent = provider.sent().await;
        assert_eq!(sent[0].subject, "Status");
        assert_eq!(sent[0].from.name.as_deref(), Some("Ops"));
        assert_eq!(sent[0].to.name.as_deref(), Some("Customer"));
        assert_eq!(sent[0].html_body, "<p>status</p>");
    }
}
