//! chainwatch - multi-chain on-chain state sync engine
//!
//! Periodically reads contract state from several independent EVM networks,
//! tolerates per-network failure, and keeps a continuously refreshed
//! cross-network aggregate with human-readable derived values.

pub mod abi;
pub mod apr;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod format;
pub mod poller;
pub mod registry;
pub mod rpc;
pub mod types;

// Re-export the main types for convenience
pub use cache::{AggregateView, NetworkStatus, NetworkView, StateCache};
pub use config::EngineSettings;
pub use engine::{PoolSubscriptions, SubscriptionHandle, SyncEngine};
pub use error::{AbiError, ConfigError, FormatError, RpcError};
pub use registry::{ChainRegistry, EndpointConfig};
pub use rpc::{ContractReader, RpcClient};
pub use types::{CallKind, NetworkId, Quantity, Query, QueryOutcome, QueryResult, SubscriptionId};
