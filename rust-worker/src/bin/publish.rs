//! Burrow Publish - publishes stdin lines to the primary exchange.
//!
//! Each non-empty line is sent as one message. Lines that are valid JSON are
//! sent as-is; anything else is wrapped as a JSON string. The routing key is
//! `AMQP_ROUTING_KEY`, falling back to the configured binding key.

use std::env;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use burrow::{Config, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let routing_key = env::var("AMQP_ROUTING_KEY")
        .unwrap_or_else(|_| config.topology.binding_key.clone());

    info!(
        exchange = %config.topology.exchange,
        routing_key = %routing_key,
        "publisher_starting"
    );

    let publisher = Publisher::from_config(&config).context("Failed to create publisher")?;

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut sent = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let payload = serde_json::from_str::<Value>(line)
            .unwrap_or_else(|_| Value::String(line.to_string()));
        let message_id = format!("{}-{}", publisher.exchange(), sent + 1);

        publisher
            .publish(&routing_key, &message_id, &payload)
            .await
            .with_context(|| format!("Failed to publish message {}", message_id))?;
        sent += 1;
    }

    publisher.close().await;

    info!(sent = sent, "publisher_finished");
    Ok(())
}
