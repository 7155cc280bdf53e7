//! Exchange types understood by the topology declarator.

use std::fmt;
use std::str::FromStr;

use lapin::ExchangeKind;

use crate::error::BrokerError;

/// Broker-side name of the consistent-hash exchange plugin type.
pub const CONSISTENT_HASH_EXCHANGE: &str = "x-consistent-hash";

/// Routing algorithm of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Direct,
    Topic,
    Fanout,
    Headers,
    /// Provided by the `rabbitmq_consistent_hash_exchange` plugin
    ConsistentHash,
}

impl ExchangeType {
    /// All known exchange types.
    pub const ALL: [ExchangeType; 5] = [
        ExchangeType::Direct,
        ExchangeType::Topic,
        ExchangeType::Fanout,
        ExchangeType::Headers,
        ExchangeType::ConsistentHash,
    ];

    /// Name the broker expects in exchange.declare.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Headers => "headers",
            ExchangeType::ConsistentHash => CONSISTENT_HASH_EXCHANGE,
        }
    }

    /// Convert to the lapin exchange kind.
    pub fn kind(&self) -> ExchangeKind {
        match self {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Headers => ExchangeKind::Headers,
            ExchangeType::ConsistentHash => {
                ExchangeKind::Custom(CONSISTENT_HASH_EXCHANGE.to_string())
            }
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        get_exchange_type(s)
            .ok_or_else(|| BrokerError::Config(format!("unknown exchange type '{}'", s)))
    }
}

/// Look up an exchange type by name.
///
/// Accepts the broker names (`direct`, `topic`, `fanout`, `headers`,
/// `x-consistent-hash`) plus `consistent-hash`. Anything else is `None`.
pub fn get_exchange_type(name: &str) -> Option<ExchangeType> {
    match name {
        "direct" => Some(ExchangeType::Direct),
        "topic" => Some(ExchangeType::Topic),
        "fanout" => Some(ExchangeType::Fanout),
        "headers" => Some(ExchangeType::Headers),
        CONSISTENT_HASH_EXCHANGE | "consistent-hash" => Some(ExchangeType::ConsistentHash),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_exchange_type_known_names() {
        assert_eq!(get_exchange_type("direct"), Some(ExchangeType::Direct));
        assert_eq!(get_exchange_type("topic"), Some(ExchangeType::Topic));
        assert_eq!(get_exchange_type("fanout"), Some(ExchangeType::Fanout));
        assert_eq!(get_exchange_type("headers"), Some(ExchangeType::Headers));
        assert_eq!(
            get_exchange_type("x-consistent-hash"),
            Some(ExchangeType::ConsistentHash)
        );
        assert_eq!(
            get_exchange_type("consistent-hash"),
            Some(ExchangeType::ConsistentHash)
        );
    }

    #[test]
    fn test_get_exchange_type_unknown_is_none() {
        assert_eq!(get_exchange_type(""), None);
        assert_eq!(get_exchange_type("Direct"), None);
        assert_eq!(get_exchange_type("x-delayed-message"), None);
    }

    #[test]
    fn test_names_round_trip_through_lookup() {
        for exchange_type in ExchangeType::ALL {
            assert_eq!(get_exchange_type(exchange_type.as_str()), Some(exchange_type));
        }
    }

    #[test]
    fn test_consistent_hash_maps_to_custom_kind() {
        assert_eq!(
            ExchangeType::ConsistentHash.kind(),
            ExchangeKind::Custom("x-consistent-hash".to_string())
        );
        assert_eq!(ExchangeType::Fanout.kind(), ExchangeKind::Fanout);
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        let err = "bogus".parse::<ExchangeType>().unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
