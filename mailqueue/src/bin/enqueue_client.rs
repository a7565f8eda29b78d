//! Mailqueue Enqueue Client - fires concurrent EmailService calls.
//!
//! Generates `ENQUEUE_CLIENTS` recipients (`user<i>@<RECIPIENT_DOMAIN>`),
//! enqueues them all at once and waits for every call to finish.

use anyhow::{bail, Context, Result};
use tracing::info;

use mailqueue::telemetry::init_tracing;
use mailqueue::{run_batch, Config, RpcClient};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!(
        service_url = %config.enqueue_service_url,
        calls = config.enqueue_clients,
        "enqueue_client_starting"
    );

    let client = RpcClient::new(&config.enqueue_service_url).context("Failed to create client")?;

    let recipients: Vec<String> = (0..config.enqueue_clients)
        .map(|i| format!("user{}@{}", i, config.recipient_domain))
        .collect();

    let report = run_batch(recipients, |_, recipient| {
        let client = client.clone();
        async move { client.enqueue(&recipient).await }
    })
    .await;

    for response in report.successes() {
        info!(response = %response.message, "enqueue_response");
    }

    if report.failed() > 0 {
        bail!("{} of {} enqueue calls failed", report.failed(), report.len());
    }

    Ok(())
}
