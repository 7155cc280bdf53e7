//! Channel abstraction used by the topology declarators.
//!
//! The declarators only need four broker calls, so they are written against
//! [`TopologyChannel`] instead of `lapin::Channel` directly. The lapin
//! implementation below maps each failure to the matching [`BrokerError`].

use async_trait::async_trait;
use lapin::{
    options::{BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};

use super::exchange::ExchangeType;
use crate::error::{BrokerError, Result};

/// A declared queue as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_count: 0,
            consumer_count: 0,
        }
    }
}

/// The subset of channel operations needed to declare topology.
#[async_trait]
pub trait TopologyChannel: Send + Sync {
    /// Limit unacknowledged deliveries per consumer.
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<()>;

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueHandle>;

    async fn declare_exchange(
        &self,
        name: &str,
        exchange_type: ExchangeType,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<()>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()>;
}

#[async_trait]
impl TopologyChannel for Channel {
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<()> {
        self.basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|source| BrokerError::Qos {
                prefetch: prefetch_count,
                source,
            })
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueHandle> {
        let queue = self
            .queue_declare(name, options, arguments)
            .await
            .map_err(|source| BrokerError::DeclareQueue {
                queue: name.to_string(),
                source,
            })?;

        Ok(QueueHandle {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn declare_exchange(
        &self,
        name: &str,
        exchange_type: ExchangeType,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<()> {
        self.exchange_declare(name, exchange_type.kind(), options, arguments)
            .await
            .map_err(|source| BrokerError::DeclareExchange {
                exchange: name.to_string(),
                source,
            })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            arguments,
        )
        .await
        .map_err(|source| BrokerError::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            source,
        })
    }
}
