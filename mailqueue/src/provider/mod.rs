//! Delivery provider module.
//!
//! The dispatch service composes an [`OutboundEmail`] from the RPC request and
//! the configured [`EmailTemplate`], then hands it to a [`DeliveryProvider`].
//!
//! ```text
//! DispatchRequest + RecipientJob → EmailTemplate::compose() → OutboundEmail → provider
//! ```

pub mod mock;
pub mod sendgrid;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;
use crate::error::PipelineError;

pub use mock::MockProvider;
pub use sendgrid::SendGridClient;

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }
}

/// A fully composed message ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// What the provider said when it accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// HTTP status returned by the provider
    pub status: u16,
    /// Provider-assigned message identifier, when one is returned
    pub message_id: Option<String>,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered(ProviderResponse),
    Failed(String),
}

impl From<Result<ProviderResponse, PipelineError>> for DeliveryOutcome {
    fn from(result: Result<ProviderResponse, PipelineError>) -> Self {
        match result {
            Ok(response) => DeliveryOutcome::Delivered(response),
            Err(PipelineError::DeliveryFailed(reason)) => DeliveryOutcome::Failed(reason),
            Err(other) => DeliveryOutcome::Failed(other.to_string()),
        }
    }
}

/// External service that transmits an email.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Attempt a best-effort send.
    async fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, PipelineError>;
}

/// Parts of every dispatched email that do not come from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub sender_name: String,
    pub recipient_name: String,
    pub subject: String,
    pub html_body: String,
}

impl EmailTemplate {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sender_name: config.sender_name.clone(),
            recipient_name: config.recipient_name.clone(),
            subject: config.email_subject.clone(),
            html_body: config.email_html_content.clone(),
        }
    }

    /// Build the message for one (sender, recipient, body) triple.
    pub fn compose(&self, sender: &str, recipient: &str, body: &str) -> OutboundEmail {
        OutboundEmail {
            from: Mailbox::new(sender, Some(self.sender_name.clone())),
            to: Mailbox::new(recipient, Some(self.recipient_name.clone())),
            subject: self.subject.clone(),
            text_body: body.to_string(),
            html_body: self.html_body.clone(),
        }
    }
}

impl Default for EmailTemplate {
    fn default() -> Self {
        Self {
            sender_name: "Mailqueue".to_string(),
            recipient_name: "User".to_string(),
            subject: "Sending with SendGrid".to_string(),
            html_body: "<strong>sending mails with send grid</strong>".to_string(),
        }
    }
}
