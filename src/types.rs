//! Core data types
//!
//! Network identifiers, the logical queries a subscription watches, and the
//! per-network results a fetch cycle produces.

use crate::abi::{self, Selector};
use crate::error::RpcError;
use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Token amount in its smallest unit.
pub type Quantity = U256;

/// Chain id of a target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const BASE: NetworkId = NetworkId(8453);
    pub const ARBITRUM: NetworkId = NetworkId(42161);
    pub const BASE_SEPOLIA: NetworkId = NetworkId(84532);
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        NetworkId(id)
    }
}

/// Handle identifying one subscription inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// The read-only contract function a query calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum CallKind {
    /// `balanceOf(holder)`
    BalanceOf { holder: Address },
    /// `totalSupply()`
    TotalSupply,
    /// `earned(account)`
    Earned { account: Address },
    /// `rewardRate()`
    RewardRate,
    /// `periodFinish()`
    PeriodFinish,
    /// Any single-word view function taking zero or one address.
    Custom {
        selector: Selector,
        arg: Option<Address>,
    },
}

impl CallKind {
    pub fn selector(&self) -> Selector {
        match self {
            CallKind::BalanceOf { .. } => abi::BALANCE_OF,
            CallKind::TotalSupply => abi::TOTAL_SUPPLY,
            CallKind::Earned { .. } => abi::EARNED,
            CallKind::RewardRate => abi::REWARD_RATE,
            CallKind::PeriodFinish => abi::PERIOD_FINISH,
            CallKind::Custom { selector, .. } => *selector,
        }
    }

    pub fn arg(&self) -> Option<Address> {
        match self {
            CallKind::BalanceOf { holder } => Some(*holder),
            CallKind::Earned { account } => Some(*account),
            CallKind::Custom { arg, .. } => *arg,
            CallKind::TotalSupply | CallKind::RewardRate | CallKind::PeriodFinish => None,
        }
    }
}

/// What a subscription watches: one call against a logically named contract.
///
/// The contract is resolved to an address per network through the registry,
/// so the same query can target every network that deploys the contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Query {
    pub contract: String,
    pub call: CallKind,
}

impl Query {
    pub fn new(contract: impl Into<String>, call: CallKind) -> Self {
        Self {
            contract: contract.into(),
            call,
        }
    }

    pub fn token_balance(contract: impl Into<String>, holder: Address) -> Self {
        Self::new(contract, CallKind::BalanceOf { holder })
    }

    pub fn total_supply(contract: impl Into<String>) -> Self {
        Self::new(contract, CallKind::TotalSupply)
    }

    pub fn earned(contract: impl Into<String>, account: Address) -> Self {
        Self::new(contract, CallKind::Earned { account })
    }

    pub fn reward_rate(contract: impl Into<String>) -> Self {
        Self::new(contract, CallKind::RewardRate)
    }

    pub fn period_finish(contract: impl Into<String>) -> Self {
        Self::new(contract, CallKind::PeriodFinish)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.call {
            CallKind::BalanceOf { holder } => {
                write!(f, "{}.balanceOf(0x{:x})", self.contract, holder)
            }
            CallKind::TotalSupply => write!(f, "{}.totalSupply()", self.contract),
            CallKind::Earned { account } => write!(f, "{}.earned(0x{:x})", self.contract, account),
            CallKind::RewardRate => write!(f, "{}.rewardRate()", self.contract),
            CallKind::PeriodFinish => write!(f, "{}.periodFinish()", self.contract),
            CallKind::Custom { selector, arg } => {
                write!(f, "{}.0x{}(", self.contract, hex::encode(selector))?;
                if let Some(arg) = arg {
                    write!(f, "0x{:x}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Outcome of one network's call within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Value { value: Quantity },
    Failed { error: RpcError },
    /// Not attempted: the network has no address for the query's contract.
    Skipped,
}

/// One (subscription, network) result of a fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub network: NetworkId,
    pub outcome: QueryOutcome,
    pub observed_at: DateTime<Utc>,
}

impl QueryResult {
    pub fn value(network: NetworkId, value: Quantity) -> Self {
        Self::observed(network, QueryOutcome::Value { value })
    }

    pub fn failed(network: NetworkId, error: RpcError) -> Self {
        Self::observed(network, QueryOutcome::Failed { error })
    }

    pub fn skipped(network: NetworkId) -> Self {
        Self::observed(network, QueryOutcome::Skipped)
    }

    fn observed(network: NetworkId, outcome: QueryOutcome) -> Self {
        Self {
            network,
            outcome,
            observed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Value { .. })
    }
}

/// A consumer's standing request to keep a query fresh on a set of networks.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub query: Query,
    pub networks: Vec<NetworkId>,
    pub interval: Duration,
    pub enabled: bool,
}
