//! Error types for broker bootstrap operations.
//!
//! Every broker step gets its own variant so callers can tell which
//! declaration failed. The underlying `lapin::Error` is kept as the source.

use thiserror::Error;

/// Errors raised while connecting, declaring topology, consuming or publishing.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection could not be established within the retry budget
    #[error("failed to connect to broker after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    /// Channel could not be opened on an established connection
    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    /// basic.qos was refused
    #[error("failed to set prefetch count {prefetch}: {source}")]
    Qos {
        prefetch: u16,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare queue '{queue}': {source}")]
    DeclareQueue {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to declare exchange '{exchange}': {source}")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to bind queue '{queue}' to exchange '{exchange}' with key '{routing_key}': {source}")]
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to start consuming from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to publish to exchange '{exchange}' with key '{routing_key}': {source}")]
    Publish {
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },

    /// Payload could not be encoded as JSON
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
