//! Consumer-facing sync engine
//!
//! Owns the registry, the fetcher, the shared cache and one [`Poller`] per
//! subscription. Consumers subscribe to a query on a set of networks and read
//! owned snapshots of the aggregate back.

use crate::cache::{AggregateView, StateCache};
use crate::config::{EngineSettings, POOL_INTERVAL};
use crate::error::ConfigError;
use crate::fetcher::MultiChainFetcher;
use crate::poller::{Poller, PollerState};
use crate::registry::ChainRegistry;
use crate::rpc::{ContractReader, RpcClient};
use crate::types::{NetworkId, Query, Subscription, SubscriptionId};
use alloy_primitives::Address;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// Handle returned by [`SyncEngine::subscribe`].
pub type SubscriptionHandle = SubscriptionId;

/// Reads that make up a staking pool view, in a fixed order: total staked,
/// reward rate, period finish, then the holder's stake and earned rewards.
pub fn pool_queries(contract: &str, holder: Option<Address>) -> Vec<Query> {
    let mut queries = vec![
        Query::total_supply(contract),
        Query::reward_rate(contract),
        Query::period_finish(contract),
    ];
    if let Some(holder) = holder {
        queries.push(Query::token_balance(contract, holder));
        queries.push(Query::earned(contract, holder));
    }
    queries
}

/// Subscriptions behind a polled staking pool view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSubscriptions {
    pub total_staked: SubscriptionHandle,
    pub reward_rate: SubscriptionHandle,
    pub period_finish: SubscriptionHandle,
    pub holder: Option<HolderSubscriptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderSubscriptions {
    pub staked: SubscriptionHandle,
    pub earned: SubscriptionHandle,
}

impl PoolSubscriptions {
    /// Handles in [`pool_queries`] order.
    pub fn handles(&self) -> Vec<SubscriptionHandle> {
        let mut handles = vec![self.total_staked, self.reward_rate, self.period_finish];
        if let Some(holder) = self.holder {
            handles.push(holder.staked);
            handles.push(holder.earned);
        }
        handles
    }
}

pub struct SyncEngine {
    registry: Arc<ChainRegistry>,
    fetcher: Arc<MultiChainFetcher>,
    cache: Arc<StateCache>,
    settings: EngineSettings,
    pollers: Mutex<HashMap<SubscriptionId, Poller>>,
    next_id: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<ChainRegistry>,
        reader: Arc<dyn ContractReader>,
        settings: EngineSettings,
    ) -> Self {
        let fetcher = Arc::new(MultiChainFetcher::new(
            registry.clone(),
            reader,
            settings.call_timeout,
        ));
        Self {
            registry,
            fetcher,
            cache: Arc::new(StateCache::new()),
            settings,
            pollers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Engine backed by a JSON-RPC client.
    pub fn with_rpc(registry: Arc<ChainRegistry>, settings: EngineSettings) -> Result<Self> {
        let client = RpcClient::new(settings.call_timeout)?;
        Ok(Self::new(registry, Arc::new(client), settings))
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    fn pollers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Poller>> {
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start keeping `query` fresh on `networks`.
    ///
    /// Polls immediately, then every `interval` (the engine default when
    /// `None` or zero). Must be called from within a Tokio runtime.
    pub fn subscribe(
        &self,
        query: Query,
        networks: &[NetworkId],
        interval: Option<Duration>,
    ) -> Result<SubscriptionHandle, ConfigError> {
        let networks = self.resolve_networks(networks)?;
        let interval = interval
            .filter(|d| !d.is_zero())
            .unwrap_or(self.settings.default_interval);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let subscription = Subscription {
            id,
            query,
            networks,
            interval,
            enabled: true,
        };
        info!("Subscribing {} to {}", id, subscription.query);

        let mut poller = Poller::new(subscription, self.fetcher.clone(), self.cache.clone());
        poller.start();
        self.pollers().insert(id, poller);
        Ok(id)
    }

    /// Poll a staking pool's reads every [`POOL_INTERVAL`].
    ///
    /// Networks are validated before anything is subscribed.
    pub fn subscribe_pool(
        &self,
        contract: &str,
        networks: &[NetworkId],
        holder: Option<Address>,
    ) -> Result<PoolSubscriptions, ConfigError> {
        self.resolve_networks(networks)?;
        let mut handles = Vec::new();
        for query in pool_queries(contract, holder) {
            handles.push(self.subscribe(query, networks, Some(POOL_INTERVAL))?);
        }

        Ok(PoolSubscriptions {
            total_staked: handles[0],
            reward_rate: handles[1],
            period_finish: handles[2],
            holder: holder.map(|_| HolderSubscriptions {
                staked: handles[3],
                earned: handles[4],
            }),
        })
    }

    /// Stop polling and drop the subscription's cached values.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ConfigError> {
        let mut poller = self
            .pollers()
            .remove(&handle)
            .ok_or(ConfigError::UnknownSubscription(handle))?;
        poller.stop();
        self.cache.remove(handle);
        info!("Unsubscribed {}", handle);
        Ok(())
    }

    /// Owned copy of the subscription's aggregate, `None` for unknown handles.
    pub fn snapshot(&self, handle: SubscriptionHandle) -> Option<AggregateView> {
        self.cache.snapshot(handle)
    }

    /// Run an extra cycle now. Returns `false` when the subscription is disabled.
    pub fn force_refresh(&self, handle: SubscriptionHandle) -> Result<bool, ConfigError> {
        self.pollers()
            .get(&handle)
            .map(Poller::force_refresh)
            .ok_or(ConfigError::UnknownSubscription(handle))
    }

    /// Pause or resume polling. Cached values survive a pause.
    pub fn set_enabled(&self, handle: SubscriptionHandle, enabled: bool) -> Result<(), ConfigError> {
        let mut pollers = self.pollers();
        let poller = pollers
            .get_mut(&handle)
            .ok_or(ConfigError::UnknownSubscription(handle))?;
        poller.set_enabled(enabled);
        Ok(())
    }

    pub fn is_active(&self, handle: SubscriptionHandle) -> bool {
        self.pollers()
            .get(&handle)
            .is_some_and(|p| p.state() == PollerState::Active)
    }

    /// Current subscriptions, ordered by handle.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .pollers()
            .values()
            .map(|p| p.subscription().clone())
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// One cycle without a subscription. Nothing is kept afterwards.
    pub async fn fetch_once(
        &self,
        query: &Query,
        networks: &[NetworkId],
    ) -> Result<AggregateView, ConfigError> {
        let networks = self.resolve_networks(networks)?;
        let results = self.fetcher.fetch_all(query, &networks).await;

        let id = SubscriptionId(0);
        let cache = StateCache::new();
        let epoch = cache.activate(id, &networks);
        if let Some(ticket) = cache.begin_cycle(id, epoch) {
            cache.apply_cycle(&ticket, &results);
        }
        cache
            .snapshot(id)
            .ok_or(ConfigError::UnknownSubscription(id))
    }

    /// Validate against the registry and drop repeated ids, keeping order.
    fn resolve_networks(&self, networks: &[NetworkId]) -> Result<Vec<NetworkId>, ConfigError> {
        self.registry.validate(networks)?;
        let mut unique = Vec::with_capacity(networks.len());
        for network in networks {
            if !unique.contains(network) {
                unique.push(*network);
            }
        }
        Ok(unique)
    }
}
