//! Mailqueue Enqueue Service - EmailService RPC server.
//!
//! Accepts recipients over `POST /EmailService/Enqueue` and publishes each one
//! to the shared RabbitMQ queue, opening a fresh broker connection per call.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use mailqueue::rpc::shutdown_signal;
use mailqueue::telemetry::init_tracing;
use mailqueue::{enqueue_router, AmqpBroker, Config, EnqueueService};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("enqueue_service_starting");

    let config = Config::from_env();
    info!(
        port = config.enqueue_port,
        queue = %config.queue_name,
        amqp_url_set = !config.amqp_url.is_empty(),
        "config_loaded"
    );

    let broker = AmqpBroker::new(config.amqp_url.clone(), config.queue_name.clone());
    let service = EnqueueService::new(Arc::new(broker));
    let app = enqueue_router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.enqueue_port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "enqueue_service_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("enqueue_service_shutdown_complete");

    Ok(())
}
