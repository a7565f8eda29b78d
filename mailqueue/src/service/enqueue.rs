//! Enqueue stage: accept a recipient and hand it to the broker.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::queue::{Broker, RecipientJob};

/// Acknowledgement returned for an accepted recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueAck {
    pub recipient: String,
    pub message: String,
}

/// Publishes recipients to the shared queue.
#[derive(Clone)]
pub struct EnqueueService {
    broker: Arc<dyn Broker>,
}

impl EnqueueService {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish one recipient.
    ///
    /// The recipient is opaque: it is only checked for being non-empty and is
    /// published exactly as given, whitespace included. Returns once the broker has accepted the
    /// job; there is no retry on failure.
    pub async fn enqueue(&self, recipient: &str) -> Result<EnqueueAck, PipelineError> {
        if recipient.is_empty() {
            warn!("enqueue_rejected_empty_recipient");
            return Err(PipelineError::InvalidRecipient);
        }

        let job = RecipientJob::new(recipient);
        let queue = self.broker.queue_name();

        if let Err(e) = self.broker.publish(&job).await {
            error!(
                queue = %queue,
                recipient = %recipient,
                error = %e,
                error_kind = e.kind(),
                "enqueue_failed"
            );
            return Err(e);
        }

        info!(queue = %queue, recipient = %recipient, "recipient_enqueued");

        Ok(EnqueueAck {
            recipient: recipient.to_string(),
            message: format!("Email id {} added successfully to queue {}", recipient, queue),
        })
    }
}
