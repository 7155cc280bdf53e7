//! Burrow - RabbitMQ topology bootstrap and consumer runner.
//!
//! This library provides the shared modules for the two Burrow binaries:
//! - `burrow-worker`: Declares the topology and consumes the primary queue
//! - `burrow-publish`: Publishes JSON messages to the primary exchange
//!
//! ## Flow
//!
//! ```text
//! Config → connect → qos → [dead-letter topology] → topology → consumer loop → close
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod runner;

// Re-export commonly used types
pub use broker::{
    declare_dead_letter_topology, declare_topology, get_exchange_type, DeadLetterSpec,
    ExchangeType, Publisher, QueueHandle, TopologyChannel, TopologySpec,
};
pub use config::{Config, ConnectionParams};
pub use consumer::{DeliveryConsumer, MessageHandler};
pub use error::{BrokerError, Result};
pub use runner::{connect, prepare, run_consumer, QueueConsumer, RetryPolicy};
