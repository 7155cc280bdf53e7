//! Configuration module for environment variable parsing.
//!
//! All settings come from `AMQP_*` environment variables. Malformed numbers
//! and booleans fall back to their defaults with a warning; an unknown
//! exchange type is an error.

use std::env;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::broker::{get_exchange_type, DeadLetterSpec, ExchangeType, TopologySpec};
use crate::error::{BrokerError, Result};
use crate::runner::RetryPolicy;

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub vhost: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            login: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

impl ConnectionParams {
    /// Render an `amqp://` URI with credentials and vhost percent-encoded.
    pub fn uri(&self) -> Result<String> {
        let invalid = || BrokerError::Config(format!("invalid broker host '{}'", self.host));

        let mut uri =
            Url::parse(&format!("amqp://{}:{}", self.host, self.port)).map_err(|_| invalid())?;
        uri.set_username(&escape_percent(&self.login))
            .map_err(|_| invalid())?;
        uri.set_password(Some(&escape_percent(&self.password)))
            .map_err(|_| invalid())?;
        uri.set_path(&format!("/{}", encode_vhost(&self.vhost)));

        Ok(uri.to_string())
    }
}

/// `Url` encodes userinfo but leaves `%` alone, and the URI parser decodes it.
fn escape_percent(raw: &str) -> String {
    raw.replace('%', "%25")
}

/// `/` is the path separator in the URI, so it must be escaped inside the vhost.
fn encode_vhost(vhost: &str) -> String {
    escape_percent(vhost).replace('/', "%2f")
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionParams,

    /// Full broker URI; takes precedence over `connection`
    pub amqp_url: Option<String>,

    /// Primary queue, exchange and binding
    pub topology: TopologySpec,

    /// Only declared when `topology.dl_enabled` is set
    pub dead_letter: DeadLetterSpec,

    /// Unacknowledged deliveries allowed per consumer
    pub prefetch_count: u16,

    pub consumer_tag: String,

    /// Connection attempts before giving up (at least one)
    pub reconnect_attempts: u32,

    /// Delay between connection attempts in milliseconds
    pub reconnect_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionParams::default();
        let connection = ConnectionParams {
            host: lookup("AMQP_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "AMQP_PORT", defaults.port),
            login: lookup("AMQP_LOGIN").unwrap_or(defaults.login),
            password: lookup("AMQP_PASSWORD").unwrap_or(defaults.password),
            vhost: lookup("AMQP_VHOST").unwrap_or(defaults.vhost),
        };

        let queue = lookup("AMQP_QUEUE").unwrap_or_else(|| "tasks".to_string());
        let exchange = lookup("AMQP_EXCHANGE").unwrap_or_else(|| "tasks".to_string());
        let exchange_type = parse_exchange_type(&lookup, "AMQP_EXCHANGE_TYPE", ExchangeType::Direct)?;
        let binding_key = lookup("AMQP_BINDING_KEY").unwrap_or_else(|| queue.clone());

        let dl_queue = lookup("AMQP_DL_QUEUE").unwrap_or_else(|| format!("{}.dlq", queue));
        let dl_exchange = lookup("AMQP_DL_EXCHANGE").unwrap_or_else(|| format!("{}.dlx", exchange));
        let dl_exchange_type =
            parse_exchange_type(&lookup, "AMQP_DL_EXCHANGE_TYPE", ExchangeType::Fanout)?;
        let dl_routing_key = lookup("AMQP_DL_ROUTING_KEY");
        let dl_routing_keys = parse_csv(&lookup, "AMQP_DL_ROUTING_KEYS")
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| {
                vec![default_dead_letter_key(
                    dl_exchange_type,
                    dl_routing_key.as_deref().unwrap_or(binding_key.as_str()),
                )]
            });

        let mut topology = TopologySpec::new(queue, exchange, exchange_type, binding_key);
        topology.dl_enabled = parse_bool(&lookup, "AMQP_DL_ENABLED", false);
        topology.dl_exchange = dl_exchange.clone();
        topology.dl_routing_key = dl_routing_key;

        let dead_letter = DeadLetterSpec::new(dl_queue, dl_exchange, dl_exchange_type, dl_routing_keys);

        Ok(Config {
            connection,
            amqp_url: lookup("AMQP_URL").filter(|url| !url.trim().is_empty()),
            topology,
            dead_letter,
            prefetch_count: parse_prefetch(&lookup, "AMQP_PREFETCH", 1),
            consumer_tag: lookup("AMQP_CONSUMER_TAG").unwrap_or_else(|| "burrow-worker".to_string()),
            reconnect_attempts: parse_or::<_, u32>(&lookup, "AMQP_RECONNECT_ATTEMPTS", 5).max(1),
            reconnect_interval_ms: parse_or(&lookup, "AMQP_RECONNECT_INTERVAL_MS", 5000),
        })
    }

    /// The URI to connect with.
    pub fn amqp_uri(&self) -> Result<String> {
        match &self.amqp_url {
            Some(url) => Ok(url.clone()),
            None => self.connection.uri(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.reconnect_attempts,
            interval: Duration::from_millis(self.reconnect_interval_ms),
        }
    }
}

/// Parse a value, warning and falling back to `default` when it is malformed.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = match lookup(name) {
        Some(v) => v,
        None => return default,
    };

    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Prefetch 0 means unlimited to the broker, so it is rejected like a malformed value.
fn parse_prefetch<F>(lookup: &F, name: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, name, default) {
        0 => {
            warn!(env_var = name, value = 0, "Prefetch must be positive, using default");
            default
        }
        prefetch => prefetch,
    }
}

/// The single dead-letter binding used when no routing keys are configured.
///
/// Dead-lettered messages keep `routing_key` (their original key, or the
/// `x-dead-letter-routing-key` override). Fanout and headers exchanges ignore
/// the key; a consistent-hash binding key is a weight.
fn default_dead_letter_key(exchange_type: ExchangeType, routing_key: &str) -> String {
    match exchange_type {
        ExchangeType::Fanout | ExchangeType::Headers => String::new(),
        ExchangeType::ConsistentHash => "1".to_string(),
        ExchangeType::Direct | ExchangeType::Topic => routing_key.to_string(),
    }
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match lookup(name) {
        Some(v) => v,
        None => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

fn parse_exchange_type<F>(lookup: &F, name: &str, default: ExchangeType) -> Result<ExchangeType>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => get_exchange_type(raw.trim()).ok_or_else(|| {
            BrokerError::Config(format!("{} has unknown exchange type '{}'", name, raw))
        }),
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv<F>(lookup: &F, name: &str) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
