//! Error taxonomy for the enqueue and dispatch pipeline.
//!
//! Every variant is collapsed into a single RPC-level `Aborted` status at the
//! service boundary (see [`crate::rpc::RpcStatus`]); the distinct kinds exist
//! so logs and tests can tell broker trouble from provider trouble.

use std::time::Duration;

use thiserror::Error;

/// Failure raised by the enqueue or dispatch stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The recipient identifier was empty.
    #[error("recipient must not be empty")]
    InvalidRecipient,

    /// Connecting, declaring, publishing, consuming or settling failed.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The delivery provider rejected the message or could not be reached.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// A bounded consume saw no job before its deadline.
    #[error("no recipient available within {0:?}")]
    ConsumeTimedOut(Duration),
}

impl PipelineError {
    /// Wrap a broker-side failure with a short description of the step.
    pub fn broker(step: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::BrokerUnavailable(format!("{}: {}", step, err))
    }

    /// Wrap a provider-side failure.
    pub fn delivery(err: impl std::fmt::Display) -> Self {
        PipelineError::DeliveryFailed(err.to_string())
    }

    /// Stable snake_case name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRecipient => "invalid_recipient",
            PipelineError::BrokerUnavailable(_) => "broker_unavailable",
            PipelineError::DeliveryFailed(_) => "delivery_failed",
            PipelineError::ConsumeTimedOut(_) => "consume_timed_out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_carries_step_and_cause() {
        let err = PipelineError::broker("Failed to connect to RabbitMQ", "connection refused");
        assert_eq!(
            err.to_string(),
            "broker unavailable: Failed to connect to RabbitMQ: connection refused"
        );
        assert_eq!(err.kind(), "broker_unavailable");
    }

    #[test]
    fn test_delivery_error_kind() {
        let err = PipelineError::delivery("status 401");
        assert!(err.to_string().contains("status 401"));
        assert_eq!(err.kind(), "delivery_failed");
    }
}
