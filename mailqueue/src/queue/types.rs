//! Queue message types and consume policy.
//!
//! A job travels through the broker as the raw UTF-8 bytes of the recipient
//! with content type `text/plain`, so any producer that can publish a string
//! can feed the dispatch service.

use std::fmt;
use std::str::FromStr;

/// Queue name used when `QUEUE_NAME` is not set.
pub const DEFAULT_QUEUE_NAME: &str = "RMQ";

/// Content type attached to every published job.
pub const JOB_CONTENT_TYPE: &str = "text/plain";

/// One queued recipient awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientJob {
    /// Recipient identifier, normally an email address
    pub recipient: String,
}

impl RecipientJob {
    /// Create a new recipient job.
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
        }
    }

    /// Bytes published to the broker.
    pub fn payload(&self) -> &[u8] {
        self.recipient.as_bytes()
    }

    /// Rebuild a job from a delivered payload.
    ///
    /// Invalid UTF-8 is replaced rather than rejected: the message has already
    /// been taken off the queue by the time it is decoded.
    pub fn from_payload(data: &[u8]) -> Self {
        Self::new(String::from_utf8_lossy(data).into_owned())
    }
}

/// When a consumed job is acknowledged to the broker.
///
/// The two policies differ only in what happens when delivery fails:
/// `Immediate` has already removed the job, `OnDeliverySuccess` hands it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge on receipt, before the provider is called.
    /// A failed delivery loses the job.
    #[default]
    Immediate,
    /// Acknowledge after a successful delivery; requeue after a failed one.
    OnDeliverySuccess,
}

impl AckPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckPolicy::Immediate => "immediate",
            AckPolicy::OnDeliverySuccess => "on_delivery_success",
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an ack policy name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ack policy: {0}")]
pub struct UnknownAckPolicy(pub String);

impl FromStr for AckPolicy {
    type Err = UnknownAckPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "immediate" | "auto" => Ok(AckPolicy::Immediate),
            "on_delivery_success" | "after_delivery" => Ok(AckPolicy::OnDeliverySuccess),
            _ => Err(UnknownAckPolicy(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_raw_recipient() {
        let job = RecipientJob::new("someone@example.com");
        assert_eq!(job.payload(), b"someone@example.com");
        assert_eq!(RecipientJob::from_payload(job.payload()), job);
    }

    #[test]
    fn test_from_payload_invalid_utf8_is_lossy() {
        let job = RecipientJob::from_payload(&[b'a', 0xff, b'b']);
        assert_eq!(job.recipient, "a\u{fffd}b");
    }

    #[test]
    fn test_ack_policy_parse() {
        assert_eq!("immediate".parse::<AckPolicy>(), Ok(AckPolicy::Immediate));
        assert_eq!("On-Delivery-Success".parse::<AckPolicy>(), Ok(AckPolicy::OnDeliverySuccess));
        assert_eq!(
            "later".parse::<AckPolicy>(),
            Err(UnknownAckPolicy("later".to_string()))
        );
    }

    #[test]
    fn test_ack_policy_default_is_immediate() {
        assert_eq!(AckPolicy::default(), AckPolicy::Immediate);
        assert_eq!(AckPolicy::default().to_string(), "immediate");
    }
}
