//! Queue, exchange and dead-letter topology declaration.
//!
//! ## Layout
//!
//! ```text
//! publisher → exchange ──(binding key)──→ queue → consumer
//!                                           │ nack (requeue = false)
//!                                           ▼
//!                         dead-letter exchange ──(routing keys)──→ dead-letter queue
//! ```
//!
//! Declarations are idempotent on the broker side, so running them on every
//! start is safe as long as the parameters do not change.

use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
};
use tracing::info;

use super::channel::{QueueHandle, TopologyChannel};
use super::exchange::ExchangeType;
use crate::error::Result;

/// Queue argument naming the exchange that receives rejected messages.
pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Queue argument overriding the routing key of dead-lettered messages.
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Declaration flags and extra arguments for a queue.
#[derive(Debug, Clone, Default)]
pub struct QueueParams {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueParams {
    /// A durable, shared, non-auto-deleted queue.
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Default::default()
        }
    }

    pub fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            ..Default::default()
        }
    }
}

/// Declaration flags and extra arguments for an exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeParams {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

impl ExchangeParams {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Default::default()
        }
    }

    pub fn declare_options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            ..Default::default()
        }
    }
}

/// The primary queue, its exchange and the binding between them.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    pub queue: String,
    pub exchange: String,
    pub exchange_type: ExchangeType,
    pub binding_key: String,
    pub queue_params: QueueParams,
    pub exchange_params: ExchangeParams,
    /// Route rejected messages to `dl_exchange`
    pub dl_enabled: bool,
    pub dl_exchange: String,
    pub dl_routing_key: Option<String>,
}

impl TopologySpec {
    /// A durable topology with dead-lettering disabled.
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        exchange_type: ExchangeType,
        binding_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            exchange_type,
            binding_key: binding_key.into(),
            queue_params: QueueParams::durable(),
            exchange_params: ExchangeParams::durable(),
            dl_enabled: false,
            dl_exchange: String::new(),
            dl_routing_key: None,
        }
    }

    /// Enable dead-lettering into `exchange`.
    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dl_enabled = true;
        self.dl_exchange = exchange.into();
        self
    }

    /// Arguments for the primary queue declaration.
    ///
    /// Starts from the queue params' own arguments and adds the dead-letter
    /// settings only when dead-lettering is enabled.
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = self.queue_params.arguments.clone();

        if self.dl_enabled {
            arguments.insert(
                DEAD_LETTER_EXCHANGE_ARG.into(),
                AMQPValue::LongString(self.dl_exchange.clone().into()),
            );

            if let Some(routing_key) = &self.dl_routing_key {
                arguments.insert(
                    DEAD_LETTER_ROUTING_KEY_ARG.into(),
                    AMQPValue::LongString(routing_key.clone().into()),
                );
            }
        }

        arguments
    }
}

/// The queue and exchange that collect rejected messages.
#[derive(Debug, Clone)]
pub struct DeadLetterSpec {
    pub queue: String,
    pub exchange: String,
    pub exchange_type: ExchangeType,
    /// One binding is made per key; empty means no bindings
    pub routing_keys: Vec<String>,
    pub queue_params: QueueParams,
    pub exchange_params: ExchangeParams,
}

impl DeadLetterSpec {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        exchange_type: ExchangeType,
        routing_keys: Vec<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            exchange_type,
            routing_keys,
            queue_params: QueueParams::durable(),
            exchange_params: ExchangeParams::durable(),
        }
    }
}

/// Declare the primary queue and exchange and bind them.
///
/// Issues exactly one queue declaration, one exchange declaration and one
/// bind. Broker failures are returned as-is.
pub async fn declare_topology<C>(channel: &C, spec: &TopologySpec) -> Result<QueueHandle>
where
    C: TopologyChannel + ?Sized,
{
    let queue = channel
        .declare_queue(
            &spec.queue,
            spec.queue_params.declare_options(),
            spec.queue_arguments(),
        )
        .await?;

    info!(
        queue = %queue.name,
        messages = queue.message_count,
        consumers = queue.consumer_count,
        dead_letter = spec.dl_enabled,
        "rabbitmq_queue_declared"
    );

    channel
        .declare_exchange(
            &spec.exchange,
            spec.exchange_type,
            spec.exchange_params.declare_options(),
            spec.exchange_params.arguments.clone(),
        )
        .await?;

    info!(
        exchange = %spec.exchange,
        exchange_type = %spec.exchange_type,
        "rabbitmq_exchange_declared"
    );

    channel
        .bind_queue(
            &queue.name,
            &spec.exchange,
            &spec.binding_key,
            FieldTable::default(),
        )
        .await?;

    info!(
        queue = %queue.name,
        exchange = %spec.exchange,
        routing_key = %spec.binding_key,
        "rabbitmq_queue_bound"
    );

    Ok(queue)
}

/// Declare the dead-letter queue and exchange and bind them once per routing key.
pub async fn declare_dead_letter_topology<C>(
    channel: &C,
    spec: &DeadLetterSpec,
) -> Result<QueueHandle>
where
    C: TopologyChannel + ?Sized,
{
    let queue = channel
        .declare_queue(
            &spec.queue,
            spec.queue_params.declare_options(),
            spec.queue_params.arguments.clone(),
        )
        .await?;

    channel
        .declare_exchange(
            &spec.exchange,
            spec.exchange_type,
            spec.exchange_params.declare_options(),
            spec.exchange_params.arguments.clone(),
        )
        .await?;

    for routing_key in &spec.routing_keys {
        channel
            .bind_queue(&queue.name, &spec.exchange, routing_key, FieldTable::default())
            .await?;
    }

    info!(
        queue = %queue.name,
        exchange = %spec.exchange,
        exchange_type = %spec.exchange_type,
        bindings = spec.routing_keys.len(),
        "rabbitmq_dead_letter_declared"
    );

    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{Call, RecordingChannel};
    use crate::error::BrokerError;
    use lapin::types::ShortString;

    fn arg<'a>(arguments: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        arguments.inner().get(&ShortString::from(key))
    }

    #[tokio::test]
    async fn test_declare_topology_issues_one_of_each_call() {
        let channel = RecordingChannel::new();
        let spec = TopologySpec::new("orders", "orders-x", ExchangeType::Topic, "orders.*");

        let queue = declare_topology(&channel, &spec).await.unwrap();

        assert_eq!(queue.name, "orders");
        assert_eq!(channel.declared_queues().len(), 1);
        assert_eq!(
            channel.declared_exchanges(),
            vec![("orders-x".to_string(), ExchangeType::Topic)]
        );
        assert_eq!(
            channel.bindings(),
            vec![(
                "orders".to_string(),
                "orders-x".to_string(),
                "orders.*".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_declare_topology_passes_queue_flags() {
        let channel = RecordingChannel::new();
        let mut spec = TopologySpec::new("scratch", "scratch-x", ExchangeType::Fanout, "");
        spec.queue_params = QueueParams {
            durable: false,
            exclusive: true,
            auto_delete: true,
            arguments: FieldTable::default(),
        };

        declare_topology(&channel, &spec).await.unwrap();

        match &channel.calls()[0] {
            Call::DeclareQueue { name, options, .. } => {
                assert_eq!(name, "scratch");
                assert!(!options.durable);
                assert!(options.exclusive);
                assert!(options.auto_delete);
                assert!(!options.passive);
            }
            other => panic!("expected queue declaration first, got {:?}", other),
        }

        match &channel.calls()[1] {
            Call::DeclareExchange { options, .. } => assert!(options.durable),
            other => panic!("expected exchange declaration second, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dead_letter_argument_present_when_enabled() {
        let channel = RecordingChannel::new();
        let spec = TopologySpec::new("orders", "orders-x", ExchangeType::Direct, "orders")
            .with_dead_letter("orders.dlx");

        declare_topology(&channel, &spec).await.unwrap();

        let (_, arguments) = &channel.declared_queues()[0];
        assert_eq!(
            arg(arguments, DEAD_LETTER_EXCHANGE_ARG),
            Some(&AMQPValue::LongString("orders.dlx".into()))
        );
        assert_eq!(arg(arguments, DEAD_LETTER_ROUTING_KEY_ARG), None);
    }

    #[tokio::test]
    async fn test_dead_letter_argument_absent_when_disabled() {
        let channel = RecordingChannel::new();
        let mut spec = TopologySpec::new("orders", "orders-x", ExchangeType::Direct, "orders");
        spec.dl_exchange = "orders.dlx".to_string();

        declare_topology(&channel, &spec).await.unwrap();

        let (_, arguments) = &channel.declared_queues()[0];
        assert_eq!(arg(arguments, DEAD_LETTER_EXCHANGE_ARG), None);
    }

    #[test]
    fn test_queue_arguments_keep_caller_entries() {
        let mut spec = TopologySpec::new("q", "x", ExchangeType::Direct, "q")
            .with_dead_letter("dlx");
        spec.dl_routing_key = Some("failed".to_string());
        spec.queue_params
            .arguments
            .insert("x-message-ttl".into(), AMQPValue::LongUInt(60_000));

        let arguments = spec.queue_arguments();

        assert_eq!(arguments.inner().len(), 3);
        assert_eq!(
            arg(&arguments, "x-message-ttl"),
            Some(&AMQPValue::LongUInt(60_000))
        );
        assert_eq!(
            arg(&arguments, DEAD_LETTER_ROUTING_KEY_ARG),
            Some(&AMQPValue::LongString("failed".into()))
        );
    }

    #[tokio::test]
    async fn test_dead_letter_topology_binds_each_routing_key() {
        let channel = RecordingChannel::new();
        let spec = DeadLetterSpec::new(
            "orders.dlq",
            "orders.dlx",
            ExchangeType::Direct,
            vec!["orders".to_string(), "orders.retry".to_string()],
        );

        let queue = declare_dead_letter_topology(&channel, &spec).await.unwrap();

        assert_eq!(queue.name, "orders.dlq");
        assert_eq!(channel.declared_queues().len(), 1);
        assert_eq!(channel.declared_exchanges().len(), 1);
        let keys: Vec<String> = channel.bindings().into_iter().map(|(_, _, key)| key).collect();
        assert_eq!(keys, vec!["orders", "orders.retry"]);
    }

    #[tokio::test]
    async fn test_dead_letter_topology_without_keys_has_no_bindings() {
        let channel = RecordingChannel::new();
        let spec = DeadLetterSpec::new("dlq", "dlx", ExchangeType::Fanout, Vec::new());

        declare_dead_letter_topology(&channel, &spec).await.unwrap();

        assert!(channel.bindings().is_empty());
        assert_eq!(channel.declared_exchanges(), vec![("dlx".to_string(), ExchangeType::Fanout)]);
    }

    #[tokio::test]
    async fn test_queue_failure_stops_declaration() {
        let channel = RecordingChannel::failing_on_queue("orders");
        let spec = TopologySpec::new("orders", "orders-x", ExchangeType::Direct, "orders");

        let err = declare_topology(&channel, &spec).await.unwrap_err();

        assert!(matches!(err, BrokerError::DeclareQueue { ref queue, .. } if queue == "orders"));
        assert!(channel.declared_exchanges().is_empty());
        assert!(channel.bindings().is_empty());
    }
}
