//! Broker abstraction shared by the AMQP and in-memory backends.
//!
//! The services only ever see a [`Broker`]: publish one job, or take one job
//! as a [`Claim`] and settle it once delivery has been attempted.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{AckPolicy, RecipientJob};
use crate::error::PipelineError;

/// A named FIFO queue of recipient jobs.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Name of the queue this broker reads and writes.
    fn queue_name(&self) -> &str;

    /// Append a job at the tail of the queue.
    ///
    /// Returns once the broker has accepted the message.
    async fn publish(&self, job: &RecipientJob) -> Result<(), PipelineError>;

    /// Take exactly one job, giving up after `max_wait` if set.
    ///
    /// The deadline only bounds the wait for a message to arrive. Once a job
    /// has been taken the call runs to completion, so a timeout never
    /// removes a job from the queue. Under [`AckPolicy::Immediate`] the
    /// returned claim is already acknowledged. Dropping the returned future
    /// abandons the wait and releases any broker resources it held.
    async fn consume_within(
        &self,
        policy: AckPolicy,
        max_wait: Option<Duration>,
    ) -> Result<Box<dyn Claim>, PipelineError>;

    /// Take exactly one job, waiting as long as it takes for one to arrive.
    async fn consume_one(&self, policy: AckPolicy) -> Result<Box<dyn Claim>, PipelineError> {
        self.consume_within(policy, None).await
    }
}

/// Run `delivery` under an optional deadline.
///
/// Backends wrap only the wait for a message in this, never the ack or
/// session teardown that follows it.
pub(crate) async fn wait_for_delivery<T, F>(
    max_wait: Option<Duration>,
    delivery: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match max_wait {
        None => delivery.await,
        Some(limit) => tokio::time::timeout(limit, delivery)
            .await
            .map_err(|_| PipelineError::ConsumeTimedOut(limit))?,
    }
}

/// A job taken from the queue that still has to be settled.
#[async_trait]
pub trait Claim: Send {
    /// The job carried by this claim.
    fn job(&self) -> &RecipientJob;

    /// Delivery succeeded; remove the job for good.
    async fn ack(self: Box<Self>) -> Result<(), PipelineError>;

    /// Delivery failed; hand the job back if the policy still allows it.
    ///
    /// Returns `true` when the job went back on the queue.
    async fn reject(self: Box<Self>) -> Result<bool, PipelineError>;
}

/// Claim for a job that was acknowledged on receipt.
///
/// Settling it is a no-op; rejecting it cannot bring the job back.
#[derive(Debug)]
pub struct SettledClaim {
    job: RecipientJob,
}

impl SettledClaim {
    pub fn new(job: RecipientJob) -> Self {
        Self { job }
    }
}

#[async_trait]
impl Claim for SettledClaim {
    fn job(&self) -> &RecipientJob {
        &self.job
    }

    async fn ack(self: Box<Self>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<bool, PipelineError> {
        Ok(false)
    }
}
