//! Mailqueue Dispatch Client - fires concurrent SendGridService calls.
//!
//! Sends `DISPATCH_CLIENTS` dispatch requests from `SENDER_EMAIL_ID` at once.
//! Each call returns only after the service has taken a recipient off the
//! queue, so this blocks while the queue is empty.

use anyhow::{bail, Context, Result};
use tracing::info;

use mailqueue::telemetry::init_tracing;
use mailqueue::{run_batch, Config, RpcClient};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!(
        service_url = %config.dispatch_service_url,
        calls = config.dispatch_clients,
        "dispatch_client_starting"
    );

    let sender = config
        .sender_email
        .clone()
        .context("SENDER_EMAIL_ID must be set")?;

    let client = RpcClient::new(&config.dispatch_service_url).context("Failed to create client")?;

    let report = run_batch(0..config.dispatch_clients, |_, i| {
        let client = client.clone();
        let sender = sender.clone();
        async move {
            let body = format!("Hi from {}, email number is {}", sender, i);
            client.dispatch(&sender, &body).await
        }
    })
    .await;

    for response in report.successes() {
        info!(
            recipient = %response.recipient,
            response = %response.message,
            "dispatch_response"
        );
    }

    if report.failed() > 0 {
        bail!("{} of {} dispatch calls failed", report.failed(), report.len());
    }

    Ok(())
}
