//! RabbitMQ backend using lapin.
//!
//! Every publish and every consume opens its own connection and channel and
//! tears them down before returning. There is no pooling: the queue is the
//! only state shared between calls, and the broker mediates all access to it.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::{info, warn};

use super::broker::{wait_for_delivery, Broker, Claim, SettledClaim};
use super::types::{AckPolicy, RecipientJob, JOB_CONTENT_TYPE};
use crate::error::PipelineError;

const CONSUMER_TAG: &str = "mailqueue-dispatch";

/// Broker backed by a RabbitMQ queue.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    url: String,
    queue_name: String,
}

impl AmqpBroker {
    /// Create a broker for `queue_name` on the server at `url`.
    ///
    /// No connection is made until the first publish or consume.
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
        }
    }

    async fn open_session(&self) -> Result<AmqpSession, PipelineError> {
        AmqpSession::open(&self.url, &self.queue_name).await
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn publish(&self, job: &RecipientJob) -> Result<(), PipelineError> {
        let session = self.open_session().await?;

        session
            .channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                job.payload(),
                BasicProperties::default().with_content_type(JOB_CONTENT_TYPE.into()),
            )
            .await
            .map_err(|e| PipelineError::broker("Failed to publish a message", e))?
            .await
            .map_err(|e| PipelineError::broker("Failed to confirm publish", e))?;

        info!(
            queue = %self.queue_name,
            recipient = %job.recipient,
            body_length = job.payload().len(),
            "rabbitmq_job_published"
        );

        session.close().await;
        Ok(())
    }

    async fn consume_within(
        &self,
        policy: AckPolicy,
        max_wait: Option<Duration>,
    ) -> Result<Box<dyn Claim>, PipelineError> {
        let session = self.open_session().await?;
        let channel = &session.channel;

        // One unacknowledged message at a time, so the broker never pushes a
        // second job to a consumer that is about to go away.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| PipelineError::broker("Failed to set QoS", e))?;

        let mut consumer = channel
            .basic_consume(
                &self.queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::broker("Failed to register a consumer", e))?;

        info!(queue = %self.queue_name, ack_policy = %policy, "rabbitmq_consumer_registered");

        // On timeout the session is dropped with nothing acked, so the broker
        // requeues anything it had already pushed to this consumer.
        let delivery = wait_for_delivery(max_wait, async {
            match consumer.next().await {
                Some(Ok(delivery)) => Ok(delivery),
                Some(Err(e)) => Err(PipelineError::broker("Failed to receive a message", e)),
                None => Err(PipelineError::BrokerUnavailable(
                    "consumer closed before a message arrived".to_string(),
                )),
            }
        })
        .await?;

        if let Err(e) = channel
            .basic_cancel(consumer.tag().as_str(), BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "rabbitmq_consumer_cancel_failed");
        }

        let job = RecipientJob::from_payload(&delivery.data);
        let delivery_tag = delivery.delivery_tag;

        info!(
            queue = %self.queue_name,
            recipient = %job.recipient,
            delivery_tag = delivery_tag,
            redelivered = delivery.redelivered,
            "rabbitmq_job_received"
        );

        match policy {
            AckPolicy::Immediate => {
                channel
                    .basic_ack(delivery_tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| PipelineError::broker("Failed to acknowledge message", e))?;
                // The job is ours now; hand teardown to the drop guard so the
                // caller gets the claim without waiting on two close round trips.
                drop(session);
                Ok(Box::new(SettledClaim::new(job)))
            }
            AckPolicy::OnDeliverySuccess => Ok(Box::new(AmqpClaim {
                job,
                delivery_tag,
                session,
            })),
        }
    }
}

/// A delivered but unacknowledged message, holding its session open.
struct AmqpClaim {
    job: RecipientJob,
    delivery_tag: u64,
    session: AmqpSession,
}

#[async_trait]
impl Claim for AmqpClaim {
    fn job(&self) -> &RecipientJob {
        &self.job
    }

    async fn ack(self: Box<Self>) -> Result<(), PipelineError> {
        let AmqpClaim {
            delivery_tag,
            session,
            ..
        } = *self;

        let result = session
            .channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| PipelineError::broker("Failed to acknowledge message", e));
        session.close().await;
        result
    }

    async fn reject(self: Box<Self>) -> Result<bool, PipelineError> {
        let AmqpClaim {
            delivery_tag,
            session,
            ..
        } = *self;

        let result = session
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map(|_| true)
            .map_err(|e| PipelineError::broker("Failed to requeue message", e));
        session.close().await;
        result
    }
}

/// A connection and channel scoped to one call.
///
/// [`AmqpSession::close`] releases both gracefully. If the session is dropped
/// without being closed (early return, cancelled future, panic) the drop
/// guard closes it in the background instead.
struct AmqpSession {
    connection: Option<Connection>,
    channel: Channel,
}

impl AmqpSession {
    /// Connect, open a channel and declare the queue (idempotent).
    async fn open(url: &str, queue_name: &str) -> Result<Self, PipelineError> {
        info!(url_length = url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::broker("Failed to connect to RabbitMQ", e))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                Self::close_connection(connection).await;
                return Err(PipelineError::broker("Failed to open a channel", e));
            }
        };

        let session = Self {
            connection: Some(connection),
            channel,
        };

        session
            .channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::broker("Failed to declare a queue", e))?;

        Ok(session)
    }

    async fn close(mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
            Self::close_connection(connection).await;
        }
    }

    async fn close_connection(connection: Connection) {
        if let Err(e) = connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }
    }
}

impl Drop for AmqpSession {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let channel = self.channel.clone();
                handle.spawn(async move {
                    let _ = channel.close(200, "Session dropped").await;
                    AmqpSession::close_connection(connection).await;
                });
            }
            Err(_) => warn!("rabbitmq_session_dropped_outside_runtime"),
        }
    }
}
