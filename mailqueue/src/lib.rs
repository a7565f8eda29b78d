//! Mailqueue - recipient queue between two RPC services.
//!
//! This library provides shared modules for the four binaries:
//! - `mailqueue-enqueue`: EmailService, publishes recipients to the queue
//! - `mailqueue-dispatch`: SendGridService, consumes one recipient per call and emails it
//! - `mailqueue-enqueue-client`: fires N concurrent enqueue calls
//! - `mailqueue-dispatch-client`: fires M concurrent dispatch calls
//!
//! ## Architecture
//!
//! ```text
//! Enqueue Client → Enqueue Service → RabbitMQ queue → Dispatch Service → SendGrid
//!                                                        ↑
//!                                              Dispatch Client
//! ```
//!
//! The queue is the only state the two services share, and it is anonymous
//! FIFO: a dispatch call delivers to whichever recipient is next, not to one
//! chosen by its caller.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod queue;
pub mod rpc;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use client::{run_batch, BatchReport, ClientError, RpcClient};
pub use config::Config;
pub use error::PipelineError;
pub use provider::{DeliveryProvider, EmailTemplate, MockProvider, SendGridClient};
pub use queue::{AckPolicy, AmqpBroker, Broker, InMemoryBroker, RecipientJob, DEFAULT_QUEUE_NAME};
pub use rpc::{dispatch_router, enqueue_router, RpcStatus};
pub use service::{DispatchRequest, DispatchService, EnqueueService};
