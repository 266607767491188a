//! Multi-chain fan-out
//!
//! Runs one query on every target network concurrently and waits for all of
//! them to settle. Each network yields exactly one [`QueryResult`]; a slow or
//! failing network only degrades its own entry.

use crate::abi::encode_call;
use crate::error::RpcError;
use crate::registry::ChainRegistry;
use crate::rpc::ContractReader;
use crate::types::{NetworkId, Query, QueryResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fans a query out across networks through a [`ContractReader`].
pub struct MultiChainFetcher {
    registry: Arc<ChainRegistry>,
    reader: Arc<dyn ContractReader>,
    call_timeout: Duration,
}

impl MultiChainFetcher {
    pub fn new(
        registry: Arc<ChainRegistry>,
        reader: Arc<dyn ContractReader>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reader,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Query every network in `networks`, in order, without short-circuiting.
    pub async fn fetch_all(&self, query: &Query, networks: &[NetworkId]) -> Vec<QueryResult> {
        let calls = networks
            .iter()
            .map(|network| self.fetch_one(query, *network));
        join_all(calls).await
    }

    async fn fetch_one(&self, query: &Query, network: NetworkId) -> QueryResult {
        let Some(endpoint) = self.registry.endpoint(network) else {
            // subscriptions are validated up front; treat a vanished network like a missing contract
            debug!("Network {} not in registry, skipping {}", network, query);
            return QueryResult::skipped(network);
        };
        let Some(to) = self.registry.contract(network, &query.contract) else {
            debug!(
                "No {} deployed on {} ({}), skipping",
                query.contract, endpoint.display_name, network
            );
            return QueryResult::skipped(network);
        };

        let data = encode_call(query.call.selector(), query.call.arg());
        let call = self.reader.call(endpoint, to, &data);

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => {
                debug!("{} on {}: {}", query, endpoint.display_name, value);
                QueryResult::value(network, value)
            }
            Ok(Err(error)) => {
                warn!("{} failed on {}: {}", query, endpoint.display_name, error);
                QueryResult::failed(network, error)
            }
            Err(_) => {
                warn!(
                    "{} timed out on {} after {:?}",
                    query, endpoint.display_name, self.call_timeout
                );
                QueryResult::failed(
                    network,
                    RpcError::unreachable(format!("timed out after {:?}", self.call_timeout)),
                )
            }
        }
    }
}
