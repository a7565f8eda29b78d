//! The two pipeline stages, independent of any transport.
//!
//! ```text
//! EnqueueService::enqueue()  → Broker::publish()
//! DispatchService::dispatch() → Broker::consume_within() → DeliveryProvider::send()
//! ```

pub mod dispatch;
pub mod enqueue;

pub use dispatch::{DispatchAck, DispatchRequest, DispatchService};
pub use enqueue::{EnqueueAck, EnqueueService};
