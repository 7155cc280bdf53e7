//! Async RabbitMQ publisher for the configured exchange.
//!
//! The publisher can be cloned and shared across tasks. It connects on first
//! use, declares its exchange, and reconnects when the channel has dropped.

use std::sync::Arc;

use lapin::{options::BasicPublishOptions, BasicProperties, Channel, Connection};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::channel::TopologyChannel;
use super::exchange::ExchangeType;
use super::topology::ExchangeParams;
use crate::config::Config;
use crate::error::{BrokerError, Result};
use crate::runner::{connect, RetryPolicy};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Async RabbitMQ publisher with connection management.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    uri: String,
    retry: RetryPolicy,
    exchange: String,
    exchange_type: ExchangeType,
    exchange_params: ExchangeParams,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a publisher for `exchange` on the broker at `uri`.
    pub fn new(
        uri: String,
        exchange: String,
        exchange_type: ExchangeType,
        exchange_params: ExchangeParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                uri,
                retry,
                exchange,
                exchange_type,
                exchange_params,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Create a publisher for the primary exchange of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.amqp_uri()?,
            config.topology.exchange.clone(),
            config.topology.exchange_type,
            config.topology.exchange_params.clone(),
            config.retry_policy(),
        ))
    }

    pub fn exchange(&self) -> &str {
        &self.inner.exchange
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Another task may have reconnected while we waited for the locks
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!(exchange = %self.inner.exchange, "rabbitmq_publisher_connecting");

        let conn = connect(&self.inner.uri, &self.inner.retry).await?;
        let ch = conn.create_channel().await.map_err(BrokerError::Channel)?;

        ch.declare_exchange(
            &self.inner.exchange,
            self.inner.exchange_type,
            self.inner.exchange_params.declare_options(),
            self.inner.exchange_params.arguments.clone(),
        )
        .await?;

        info!(
            exchange = %self.inner.exchange,
            exchange_type = %self.inner.exchange_type,
            "rabbitmq_publisher_connected"
        );

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish `payload` as JSON with the given routing key.
    pub async fn publish<T: Serialize>(
        &self,
        routing_key: &str,
        message_id: &str,
        payload: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.publish_raw(routing_key, message_id, &body).await
    }

    /// Publish an already encoded JSON body.
    pub async fn publish_raw(&self, routing_key: &str, message_id: &str, body: &[u8]) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let publish_error = |source: lapin::Error| BrokerError::Publish {
            exchange: self.inner.exchange.clone(),
            routing_key: routing_key.to_string(),
            source,
        };

        channel
            .basic_publish(
                &self.inner.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.into()),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        info!(
            exchange = %self.inner.exchange,
            routing_key = %routing_key,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!(exchange = %self.inner.exchange, "rabbitmq_publisher_closed");
    }
}
