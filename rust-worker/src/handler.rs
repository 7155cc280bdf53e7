//! Default message handler for the worker binary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::message::Delivery;
use serde_json::Value;
use tracing::info;

use burrow::MessageHandler;

/// Logs each JSON message. Bodies that are not JSON are rejected.
pub struct JsonLogHandler;

#[async_trait]
impl MessageHandler for JsonLogHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let payload = parse_payload(&delivery.data)?;

        info!(
            routing_key = %delivery.routing_key.as_str(),
            redelivered = delivery.redelivered,
            payload = %payload,
            "message_handled"
        );

        Ok(())
    }
}

fn parse_payload(data: &[u8]) -> Result<Value> {
    serde_json::from_slice(data).with_context(|| {
        format!(
            "Body is not JSON: {}",
            String::from_utf8_lossy(&data[..data.len().min(200)])
        )
    })
}
