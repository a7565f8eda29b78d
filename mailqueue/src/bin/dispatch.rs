//! Mailqueue Dispatch Service - SendGridService RPC server.
//!
//! Each `POST /SendGridService/Dispatch` call takes one recipient off the
//! shared queue (waiting if it is empty) and emails it through SendGrid.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::info;

use mailqueue::rpc::shutdown_signal;
use mailqueue::telemetry::init_tracing;
use mailqueue::{
    dispatch_router, AmqpBroker, Config, DispatchService, EmailTemplate, SendGridClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("dispatch_service_starting");

    let config = Config::from_env();
    info!(
        port = config.dispatch_port,
        queue = %config.queue_name,
        ack_policy = %config.ack_policy,
        consume_timeout_ms = ?config.consume_timeout_ms,
        sendgrid_api_key_set = config.sendgrid_api_key.is_some(),
        sendgrid_base_url = %config.sendgrid_base_url,
        "config_loaded"
    );

    let api_key = config
        .sendgrid_api_key
        .clone()
        .context("SENDGRID_API_KEY must be set")?;

    let http = Client::builder()
        .pool_max_idle_per_host(100)
        .build()
        .context("Failed to create HTTP client")?;

    let provider = SendGridClient::new(
        http,
        &config.sendgrid_base_url,
        api_key,
        config.request_timeout(),
    )
    .context("Invalid SENDGRID_BASE_URL")?;

    let broker = AmqpBroker::new(config.amqp_url.clone(), config.queue_name.clone());

    let service = DispatchService::new(Arc::new(broker), Arc::new(provider))
        .with_template(EmailTemplate::from_config(&config))
        .with_ack_policy(config.ack_policy)
        .with_max_wait(config.consume_timeout());
    let app = dispatch_router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.dispatch_port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "dispatch_service_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("dispatch_service_shutdown_complete");

    Ok(())
}
