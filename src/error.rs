//! Error types
//!
//! Per-call failures (`RpcError`) are values: they are stored in the cache
//! next to the last good quantity and surfaced in snapshots, never bubbled
//! up through a cycle. Configuration errors are fatal to the request that
//! raised them.

use crate::types::{NetworkId, SubscriptionId};
use serde::Serialize;
use thiserror::Error;

/// Call encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid function selector: {0}")]
    InvalidSelector(String),
}

/// Failure of a single `eth_call` against one network.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcError {
    /// Transport failure, timeout or an HTTP error without a JSON-RPC body.
    #[error("network unreachable: {reason}")]
    NetworkUnreachable { reason: String },

    /// Body was not JSON, or carried neither `result` nor `error`.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// Node reported an execution error.
    #[error("rpc error {code}: {message}")]
    RpcReverted { code: i64, message: String },
}

impl RpcError {
    pub fn unreachable(reason: impl Into<String>) -> Self {
        RpcError::NetworkUnreachable {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        RpcError::MalformedResponse {
            reason: reason.into(),
        }
    }
}

/// Registry and subscription setup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(NetworkId),

    #[error("duplicate network: {0}")]
    DuplicateNetwork(NetworkId),

    #[error("invalid address for {contract} on network {network}: {source}")]
    InvalidContractAddress {
        network: NetworkId,
        contract: String,
        source: AbiError,
    },

    #[error("subscription must target at least one network")]
    NoNetworks,

    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}

/// Token amount parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount has {found} fractional digits, token supports {max}")]
    TooManyDecimals { found: usize, max: u8 },

    #[error("amount does not fit in 256 bits")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_serializes_with_kind_tag() {
        let err = RpcError::RpcReverted {
            code: 3,
            message: "execution reverted".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "rpc_reverted");
        assert_eq!(json["code"], 3);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnsupportedNetwork(NetworkId(10));
        assert_eq!(err.to_string(), "unsupported network: 10");
    }
}
