//! Consumer runner: connect, declare topology, hand off to a consumer.
//!
//! ```text
//! connect (retry) → channel → qos → [dead-letter topology] → topology → consumer.consume() → close
//! ```
//!
//! The runner is either consuming or shut down. It moves to shutdown exactly
//! once, when the consumer's loop returns, whatever the outcome.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::broker::{
    declare_dead_letter_topology, declare_topology, QueueHandle, TopologyChannel,
};
use crate::config::Config;
use crate::error::{BrokerError, Result};

/// How often and how patiently to retry establishing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

/// A consumer bound to a declared queue.
///
/// `consume` runs until the consumer decides to stop (signal, closed
/// stream, fatal error). The runner closes the connection afterwards.
#[async_trait]
pub trait QueueConsumer: Send {
    async fn consume(self) -> Result<()>;
}

/// Connect to the broker, retrying with a fixed interval.
pub async fn connect(uri: &str, retry: &RetryPolicy) -> Result<Connection> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;

    loop {
        info!(attempt = attempt, uri_length = uri.len(), "rabbitmq_connecting");

        match Connection::connect(uri, ConnectionProperties::default()).await {
            Ok(conn) => {
                info!(attempt = attempt, "rabbitmq_connected");
                return Ok(conn);
            }
            Err(source) if attempt >= attempts => {
                return Err(BrokerError::Connect { attempts, source });
            }
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    retry_in_ms = retry.interval.as_millis() as u64,
                    error = %e,
                    "rabbitmq_connect_failed"
                );
                sleep(retry.interval).await;
                attempt += 1;
            }
        }
    }
}

/// Set prefetch and declare every queue and exchange the consumer needs.
///
/// The dead-letter topology goes first so the primary queue's
/// `x-dead-letter-exchange` points at an exchange that already exists.
pub async fn prepare<C>(channel: &C, config: &Config) -> Result<QueueHandle>
where
    C: TopologyChannel + ?Sized,
{
    channel.set_prefetch(config.prefetch_count).await?;
    info!(prefetch_count = config.prefetch_count, "rabbitmq_qos_set");

    if config.topology.dl_enabled {
        declare_dead_letter_topology(channel, &config.dead_letter).await?;
    }

    declare_topology(channel, &config.topology).await
}

/// Run a consumer against the configured broker until its loop returns.
///
/// `make_consumer` receives the open channel and the declared queue. If
/// channel setup or declaration fails, the connection is closed before the
/// error is returned.
pub async fn run_consumer<F, C>(config: &Config, make_consumer: F) -> Result<()>
where
    F: FnOnce(Channel, QueueHandle) -> C,
    C: QueueConsumer,
{
    let conn = connect(&config.amqp_uri()?, &config.retry_policy()).await?;

    let channel = or_cleanup(
        async { conn.create_channel().await.map_err(BrokerError::Channel) },
        close_connection(&conn),
    )
    .await?;
    info!("rabbitmq_channel_created");

    let queue = or_cleanup(prepare(&channel, config), close_connection(&conn)).await?;

    info!(queue = %queue.name, "runner_consuming");
    let outcome = make_consumer(channel, queue).consume().await;

    close_connection(&conn).await;

    info!(clean = outcome.is_ok(), "runner_shutdown_complete");
    outcome
}

async fn close_connection(conn: &Connection) {
    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }
}

/// Await `step`; if it fails, await `cleanup` before returning the error.
async fn or_cleanup<T, S, C>(step: S, cleanup: C) -> Result<T>
where
    S: Future<Output = Result<T>>,
    C: Future<Output = ()>,
{
    match step.await {
        Ok(value) => Ok(value),
        Err(e) => {
            cleanup.await;
            Err(e)
        }
    }
}
