//! Burrow Worker - RabbitMQ consumer with declared topology.
//!
//! Declares the configured queue, exchange and optional dead-letter
//! topology, then consumes the queue with a JSON logging handler until
//! SIGINT/SIGTERM or until the broker closes the consumer.

mod handler;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use burrow::{run_consumer, Config, DeliveryConsumer};
use handler::JsonLogHandler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        amqp_url_set = config.amqp_url.is_some(),
        host = %config.connection.host,
        queue = %config.topology.queue,
        exchange = %config.topology.exchange,
        exchange_type = %config.topology.exchange_type,
        dl_enabled = config.topology.dl_enabled,
        prefetch_count = config.prefetch_count,
        "config_loaded"
    );

    let handler = Arc::new(JsonLogHandler);
    let consumer_tag = config.consumer_tag.clone();

    run_consumer(&config, |channel, queue| {
        DeliveryConsumer::new(channel, queue, consumer_tag, handler)
    })
    .await
    .context("Consumer failed")?;

    Ok(())
}
