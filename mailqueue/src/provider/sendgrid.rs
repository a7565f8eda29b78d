//! SendGrid v3 mail-send client.
//!
//! Reference: https://docs.sendgrid.com/api-reference/mail-send/mail-send

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use super::{DeliveryProvider, Mailbox, OutboundEmail, ProviderResponse};
use crate::error::PipelineError;

const MAIL_SEND_PATH: &str = "/v3/mail/send";

/// Longest slice of a provider error body copied into the error message.
const ERROR_BODY_PREVIEW: usize = 512;

/// Delivery provider backed by the SendGrid HTTP API.
#[derive(Clone)]
pub struct SendGridClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    timeout: Duration,
}

impl SendGridClient {
    /// Create a client posting to `<base_url>/v3/mail/send`.
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(base_url)?.join(MAIL_SEND_PATH)?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl std::fmt::Debug for SendGridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGridClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DeliveryProvider for SendGridClient {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<ProviderResponse, PipelineError> {
        let body = MailSendBody::from_email(email);

        info!(
            to = %email.to.email,
            from = %email.from.email,
            text_length = email.text_body.len(),
            "sendgrid_send_starting"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::delivery(format!("sendgrid request failed: {}", e)))?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_success() {
            info!(
                to = %email.to.email,
                status_code = status.as_u16(),
                message_id = ?message_id,
                "sendgrid_send_complete"
            );
            return Ok(ProviderResponse {
                status: status.as_u16(),
                message_id,
            });
        }

        let text = response.text().await.unwrap_or_default();
        let preview = &text[..floor_char_boundary(&text, ERROR_BODY_PREVIEW)];

        warn!(
            to = %email.to.email,
            status_code = status.as_u16(),
            body_preview = %preview,
            "sendgrid_send_rejected"
        );

        Err(PipelineError::delivery(format!(
            "sendgrid returned {}: {}",
            status, preview
        )))
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Serialize)]
struct MailSendBody<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: &'a Mailbox,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: Vec<&'a Mailbox>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    mime_type: &'static str,
    value: &'a str,
}

impl<'a> MailSendBody<'a> {
    fn from_email(email: &'a OutboundEmail) -> Self {
        // SendGrid requires text/plain to precede text/html and rejects empty values.
        let content = [
            ("text/plain", email.text_body.as_str()),
            ("text/html", email.html_body.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(mime_type, value)| Content { mime_type, value })
        .collect();

        Self {
            personalizations: vec![Personalization {
                to: vec![&email.to],
            }],
            from: &email.from,
            subject: &email.subject,
            content,
        }
    }
}
