//! In-process broker for tests and local pipelines.
//!
//! Behaves like a single RabbitMQ queue: FIFO order, consumers block until a
//! job arrives, rejected claims go back to the head. A failure can be injected
//! to simulate an unreachable broker, and a settle delay to simulate the
//! round trips a real broker makes after handing out a job.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use super::broker::{wait_for_delivery, Broker, Claim, SettledClaim};
use super::types::{AckPolicy, RecipientJob};
use crate::error::PipelineError;

/// Shared in-memory queue. Clones see the same jobs.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    queue_name: String,
    jobs: Mutex<VecDeque<RecipientJob>>,
    available: Notify,
    failure: Mutex<Option<String>>,
    settle_delay: Mutex<Option<Duration>>,
}

impl InMemoryBroker {
    /// Create an empty queue called `queue_name`.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue_name: queue_name.into(),
                jobs: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                failure: Mutex::new(None),
                settle_delay: Mutex::new(None),
            }),
        }
    }

    /// Make every subsequent publish and consume fail with `cause`.
    pub async fn fail_with(&self, cause: impl Into<String>) {
        *self.inner.failure.lock().await = Some(cause.into());
    }

    /// Clear an injected failure.
    pub async fn recover(&self) {
        *self.inner.failure.lock().await = None;
    }

    /// Pause for `delay` after a job has been taken and before the consume
    /// returns, like the ack and session teardown of the AMQP backend.
    pub async fn delay_settlement(&self, delay: Duration) {
        *self.inner.settle_delay.lock().await = Some(delay);
    }

    /// Number of jobs waiting in the queue.
    pub async fn len(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Recipients currently queued, head first.
    pub async fn pending(&self) -> Vec<String> {
        self.inner
            .jobs
            .lock()
            .await
            .iter()
            .map(|job| job.recipient.clone())
            .collect()
    }

    async fn check_available(&self) -> Result<(), PipelineError> {
        match self.inner.failure.lock().await.as_ref() {
            Some(cause) => Err(PipelineError::broker("Failed to connect to RabbitMQ", cause)),
            None => Ok(()),
        }
    }

    /// Pop the head job, waiting for a publish while the queue is empty.
    async fn next_job(&self) -> Result<RecipientJob, PipelineError> {
        loop {
            // Register before looking, so a publish landing in between is
            // not missed when several consumers wait at once.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.inner.jobs.lock().await.pop_front() {
                return Ok(job);
            }
            notified.await;
        }
    }

    async fn requeue(&self, job: RecipientJob) {
        self.inner.jobs.lock().await.push_front(job);
        self.inner.available.notify_one();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    async fn publish(&self, job: &RecipientJob) -> Result<(), PipelineError> {
        self.check_available().await?;

        self.inner.jobs.lock().await.push_back(job.clone());
        self.inner.available.notify_one();

        info!(
            queue = %self.inner.queue_name,
            recipient = %job.recipient,
            "memory_job_published"
        );
        Ok(())
    }

    async fn consume_within(
        &self,
        policy: AckPolicy,
        max_wait: Option<Duration>,
    ) -> Result<Box<dyn Claim>, PipelineError> {
        self.check_available().await?;

        let job = wait_for_delivery(max_wait, self.next_job()).await?;

        let settle_delay = *self.inner.settle_delay.lock().await;
        if let Some(delay) = settle_delay {
            tokio::time::sleep(delay).await;
        }

        info!(
            queue = %self.inner.queue_name,
            recipient = %job.recipient,
            ack_policy = %policy,
            "memory_job_received"
        );

        match policy {
            AckPolicy::Immediate => Ok(Box::new(SettledClaim::new(job))),
            AckPolicy::OnDeliverySuccess => Ok(Box::new(MemoryClaim {
                job,
                broker: self.clone(),
            })),
        }
    }
}

struct MemoryClaim {
    job: RecipientJob,
    broker: InMemoryBroker,
}

#[async_trait]
impl Claim for MemoryClaim {
    fn job(&self) -> &RecipientJob {
        &self.job
    }

    async fn ack(self: Box<Self>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<bool, PipelineError> {
        let MemoryClaim { job, broker } = *self;
        broker.requeue(job).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = InMemoryBroker::new("RMQ");
        broker.publish(&RecipientJob::new("r1@example.com")).await.unwrap();
        broker.publish(&RecipientJob::new("r2@example.com")).await.unwrap();

        let first = broker.consume_one(AckPolicy::Immediate).await.unwrap();
        let second = broker.consume_one(AckPolicy::Immediate).await.unwrap();

        assert_eq!(first.job().recipient, "r1@example.com");
        assert_eq!(second.job().recipient, "r2@example.com");
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_consume_waits_for_publish() {
        let broker = InMemoryBroker::new("RMQ");

        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.consume_one(AckPolicy::Immediate).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());

        broker.publish(&RecipientJob::new("late@example.com")).await.unwrap();
        let claim = consumer.await.unwrap().unwrap();
        assert_eq!(claim.job().recipient, "late@example.com");
    }

    #[tokio::test]
    async fn test_consume_within_times_out_on_empty_queue() {
        let broker = InMemoryBroker::new("RMQ");
        let result = broker
            .consume_within(AckPolicy::Immediate, Some(Duration::from_millis(20)))
            .await;

        assert!(matches!(result, Err(PipelineError::ConsumeTimedOut(_))));
    }

    #[tokio::test]
    async fn test_deadline_does_not_cover_settlement() {
        let broker = InMemoryBroker::new("RMQ");
        broker.publish(&RecipientJob::new("taken@example.com")).await.unwrap();
        broker.delay_settlement(Duration::from_millis(50)).await;

        let claim = broker
            .consume_within(AckPolicy::Immediate, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        assert_eq!(claim.job().recipient, "taken@example.com");
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_timed_out_wait_leaves_later_job_queued() {
        let broker = InMemoryBroker::new("RMQ");
        let result = broker
            .consume_within(AckPolicy::Immediate, Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(PipelineError::ConsumeTimedOut(_))));

        broker.publish(&RecipientJob::new("later@example.com")).await.unwrap();
        assert_eq!(broker.pending().await, vec!["later@example.com"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiting_consumers_all_receive_concurrent_publishes() {
        for _ in 0..200 {
            let broker = InMemoryBroker::new("RMQ");

            let consumers: Vec<_> = (0..4)
                .map(|_| {
                    let broker = broker.clone();
                    tokio::spawn(async move { broker.consume_one(AckPolicy::Immediate).await })
                })
                .collect();

            let publishers: Vec<_> = (0..4)
                .map(|i| {
                    let broker = broker.clone();
                    tokio::spawn(async move {
                        broker
                            .publish(&RecipientJob::new(format!("r{}@example.com", i)))
                            .await
                    })
                })
                .collect();
            for publisher in futures::future::join_all(publishers).await {
                publisher.unwrap().unwrap();
            }

            let received = tokio::time::timeout(
                Duration::from_secs(5),
                futures::future::join_all(consumers),
            )
            .await
            .expect("a waiting consumer missed its wakeup");

            let recipients: HashSet<String> = received
                .into_iter()
                .map(|r| r.unwrap().unwrap().job().recipient.clone())
                .collect();
            assert_eq!(recipients.len(), 4);
            assert!(broker.is_empty().await);
        }
    }

    #[tokio::test]
    async fn test_settled_claim_reject_does_not_requeue() {
        let broker = InMemoryBroker::new("RMQ");
        broker.publish(&RecipientJob::new("gone@example.com")).await.unwrap();

        let claim = broker.consume_one(AckPolicy::Immediate).await.unwrap();
        assert!(!claim.reject().await.unwrap());
        assert!(broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_pending_claim_reject_requeues_at_head() {
        let broker = InMemoryBroker::new("RMQ");
        broker.publish(&RecipientJob::new("a@example.com")).await.unwrap();
        broker.publish(&RecipientJob::new("b@example.com")).await.unwrap();

        let claim = broker.consume_one(AckPolicy::OnDeliverySuccess).await.unwrap();
        assert_eq!(claim.job().recipient, "a@example.com");
        assert!(claim.reject().await.unwrap());

        assert_eq!(broker.pending().await, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let broker = InMemoryBroker::new("RMQ");
        broker.fail_with("connection refused").await;

        let err = broker
            .publish(&RecipientJob::new("x@example.com"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(broker.is_empty().await);

        broker.recover().await;
        broker.publish(&RecipientJob::new("x@example.com")).await.unwrap();
        assert_eq!(broker.len().await, 1);
    }
}
