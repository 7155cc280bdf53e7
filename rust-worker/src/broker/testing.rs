//! Recording channel for unit tests.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::FieldTable,
};

use super::channel::{QueueHandle, TopologyChannel};
use super::exchange::ExchangeType;
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone)]
pub enum Call {
    Prefetch(u16),
    DeclareQueue {
        name: String,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    },
    DeclareExchange {
        name: String,
        exchange_type: ExchangeType,
        options: ExchangeDeclareOptions,
    },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// Records every call and optionally fails declarations of one queue.
#[derive(Default)]
pub struct RecordingChannel {
    calls: Mutex<Vec<Call>>,
    fail_queue: Option<String>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_queue(queue: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_queue: Some(queue.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn declared_queues(&self) -> Vec<(String, FieldTable)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DeclareQueue {
                    name, arguments, ..
                } => Some((name, arguments)),
                _ => None,
            })
            .collect()
    }

    pub fn declared_exchanges(&self) -> Vec<(String, ExchangeType)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DeclareExchange {
                    name,
                    exchange_type,
                    ..
                } => Some((name, exchange_type)),
                _ => None,
            })
            .collect()
    }

    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Bind {
                    queue,
                    exchange,
                    routing_key,
                } => Some((queue, exchange, routing_key)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TopologyChannel for RecordingChannel {
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<()> {
        self.record(Call::Prefetch(prefetch_count));
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueHandle> {
        self.record(Call::DeclareQueue {
            name: name.to_string(),
            options,
            arguments,
        });

        if self.fail_queue.as_deref() == Some(name) {
            return Err(BrokerError::DeclareQueue {
                queue: name.to_string(),
                source: lapin::Error::IOError(Arc::new(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "access refused",
                ))),
            });
        }

        Ok(QueueHandle::new(name))
    }

    async fn declare_exchange(
        &self,
        name: &str,
        exchange_type: ExchangeType,
        options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> Result<()> {
        self.record(Call::DeclareExchange {
            name: name.to_string(),
            exchange_type,
            options,
        });
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: FieldTable,
    ) -> Result<()> {
        self.record(Call::Bind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }
}
