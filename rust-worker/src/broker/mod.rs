//! Broker module for RabbitMQ topology and publishing.
//!
//! This module provides:
//! - Exchange types and name lookup
//! - A channel trait the declarators are written against
//! - Primary and dead-letter topology declaration
//! - An async publisher for the primary exchange

pub mod channel;
pub mod exchange;
pub mod publisher;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{QueueHandle, TopologyChannel};
pub use exchange::{get_exchange_type, ExchangeType};
pub use publisher::Publisher;
pub use topology::{
    declare_dead_letter_topology, declare_topology, DeadLetterSpec, ExchangeParams, QueueParams,
    TopologySpec, DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_ROUTING_KEY_ARG,
};
