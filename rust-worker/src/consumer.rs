//! Delivery consumer: a ready-made [`QueueConsumer`] around a message handler.
//!
//! Each delivery is handled on its own task, so the number of deliveries in
//! flight is bounded by the channel prefetch. A handler success acks the
//! message; a failure nacks it without requeueing, which hands it to the
//! queue's dead-letter exchange when one is configured. On shutdown the
//! consumer stops taking deliveries and waits for running handlers, so
//! their acks and nacks go out before the connection is closed.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
    Channel,
};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::broker::QueueHandle;
use crate::error::{BrokerError, Result};
use crate::runner::QueueConsumer;

/// Caller-supplied processing for a single delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// What to tell the broker once a delivery has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Nack without requeue
    Reject,
}

impl Settlement {
    pub fn from_outcome<T, E>(outcome: &std::result::Result<T, E>) -> Self {
        match outcome {
            Ok(_) => Settlement::Ack,
            Err(_) => Settlement::Reject,
        }
    }
}

/// Handler tasks that have not finished yet.
struct InFlight {
    tasks: JoinSet<()>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to finish. Pending forever when none is running.
    async fn next_finished(&mut self) {
        match self.tasks.join_next().await {
            Some(result) => log_join(result),
            None => std::future::pending::<()>().await,
        }
    }

    /// Wait for every running task.
    async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            log_join(result);
        }
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "message_task_failed");
    }
}

/// Consumes the declared queue until shutdown or until the stream closes.
pub struct DeliveryConsumer<H> {
    channel: Channel,
    queue: QueueHandle,
    consumer_tag: String,
    handler: Arc<H>,
}

impl<H: MessageHandler> DeliveryConsumer<H> {
    pub fn new(channel: Channel, queue: QueueHandle, consumer_tag: String, handler: Arc<H>) -> Self {
        Self {
            channel,
            queue,
            consumer_tag,
            handler,
        }
    }
}

#[async_trait]
impl<H: MessageHandler> QueueConsumer for DeliveryConsumer<H> {
    async fn consume(self) -> Result<()> {
        let DeliveryConsumer {
            channel,
            queue,
            consumer_tag,
            handler,
        } = self;
        let queue = queue.name;

        let mut consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Consume {
                queue: queue.clone(),
                source,
            })?;

        info!(queue = %queue, consumer_tag = %consumer_tag, "rabbitmq_consumer_started");

        let channel = Arc::new(channel);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let mut in_flight = InFlight::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("consumer_stopping");
                    break;
                }
                _ = in_flight.next_finished(), if !in_flight.is_empty() => {}
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let delivery_tag = delivery.delivery_tag;
                            let message_id = delivery
                                .properties
                                .message_id()
                                .as_ref()
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "unknown".to_string());

                            info!(
                                queue = %queue,
                                message_id = %message_id,
                                delivery_tag = delivery_tag,
                                body_length = delivery.data.len(),
                                "rabbitmq_message_received"
                            );

                            let handler = Arc::clone(&handler);
                            let channel = Arc::clone(&channel);
                            let queue = queue.clone();

                            in_flight.spawn(async move {
                                let outcome = handler.handle(&delivery).await;
                                if let Err(e) = &outcome {
                                    error!(
                                        queue = %queue,
                                        message_id = %message_id,
                                        error = %e,
                                        "message_handler_failed"
                                    );
                                }

                                settle(&channel, delivery_tag, Settlement::from_outcome(&outcome)).await;
                            });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "rabbitmq_delivery_error");
                        }
                        None => {
                            warn!(queue = %queue, "rabbitmq_consumer_closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(queue = %queue, in_flight = in_flight.len(), "consumer_draining");
        in_flight.drain().await;

        Ok(())
    }
}

async fn settle(channel: &Channel, delivery_tag: u64, settlement: Settlement) {
    let result = match settlement {
        Settlement::Ack => {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
        }
        Settlement::Reject => {
            channel
                .basic_nack(delivery_tag, nack_options())
                .await
        }
    };

    match result {
        Ok(()) => info!(delivery_tag = delivery_tag, settlement = ?settlement, "rabbitmq_message_settled"),
        Err(e) => error!(
            delivery_tag = delivery_tag,
            settlement = ?settlement,
            error = %e,
            "rabbitmq_settle_failed"
        ),
    }
}

/// Rejected messages are not requeued, so the broker dead-letters them.
fn nack_options() -> BasicNackOptions {
    BasicNackOptions {
        requeue: false,
        ..Default::default()
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
