//! Queue module for broker operations.
//!
//! This module provides:
//! - The job type and ack policy
//! - The [`Broker`] seam the services are written against
//! - A RabbitMQ backend and an in-memory backend
//!
//! ## Architecture
//!
//! ```text
//! Enqueue Service → queue (QUEUE_NAME) → Dispatch Service
//! ```

pub mod amqp;
pub mod broker;
pub mod memory;
pub mod types;

pub use amqp::AmqpBroker;
pub use broker::{Broker, Claim, SettledClaim};
pub use memory::InMemoryBroker;
pub use types::{AckPolicy, RecipientJob, UnknownAckPolicy, DEFAULT_QUEUE_NAME, JOB_CONTENT_TYPE};
