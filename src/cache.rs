//! Per-subscription state cache and aggregation
//!
//! Holds the last known value and status of every (subscription, network)
//! pair and derives the cross-network [`AggregateView`] from it.
//!
//! Rules:
//! - A cycle's results are applied under one write lock, so readers never
//!   see half a cycle.
//! - Cycles carry a [`CycleTicket`]. A ticket older than (or equal to) the
//!   last applied one is rejected, so a slow early cycle cannot overwrite a
//!   fresher one.
//! - Stopping a subscription bumps its epoch; tickets from the old epoch are
//!   discarded, so in-flight cycles never land after a stop.
//! - A failed or skipped network keeps its last good value.

use crate::error::RpcError;
use crate::types::{NetworkId, Quantity, QueryOutcome, QueryResult, SubscriptionId};
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Permission to apply one cycle's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    pub subscription: SubscriptionId,
    epoch: u64,
    seq: u64,
}

impl CycleTicket {
    /// Position of the cycle in start order.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What happened to an `apply_cycle` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A cycle started at the same time or later has already applied.
    Superseded,
    /// The subscription was stopped or removed after the cycle started.
    Retired,
}

/// Latest status of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NetworkStatus {
    /// No cycle has reported on this network yet.
    Pending,
    Ok,
    Failed { error: RpcError },
    Skipped,
}

#[derive(Debug, Clone)]
struct NetworkSlot {
    status: NetworkStatus,
    last_good: Option<Quantity>,
    last_good_at: Option<DateTime<Utc>>,
    observed_at: Option<DateTime<Utc>>,
}

impl Default for NetworkSlot {
    fn default() -> Self {
        Self {
            status: NetworkStatus::Pending,
            last_good: None,
            last_good_at: None,
            observed_at: None,
        }
    }
}

impl NetworkSlot {
    fn record(&mut self, result: &QueryResult) {
        self.observed_at = Some(result.observed_at);
        match &result.outcome {
            QueryOutcome::Value { value } => {
                self.status = NetworkStatus::Ok;
                self.last_good = Some(*value);
                self.last_good_at = Some(result.observed_at);
            }
            QueryOutcome::Failed { error } => {
                self.status = NetworkStatus::Failed {
                    error: error.clone(),
                };
            }
            QueryOutcome::Skipped => self.status = NetworkStatus::Skipped,
        }
    }
}

#[derive(Debug)]
struct SubscriptionSlot {
    epoch: u64,
    active: bool,
    next_seq: u64,
    last_applied: Option<u64>,
    cycles_applied: u64,
    networks: BTreeMap<NetworkId, NetworkSlot>,
}

/// One network's entry in an [`AggregateView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkView {
    pub network: NetworkId,
    pub status: NetworkStatus,
    /// Last good value, zero if the network never answered.
    pub value: Quantity,
    /// The value predates a failed cycle.
    pub stale: bool,
    pub observed_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl NetworkView {
    /// Whether this network's value counts towards the total.
    pub fn contributes(&self) -> bool {
        !matches!(self.status, NetworkStatus::Skipped)
    }
}

/// Cross-network summary of one subscription, built from the cache alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateView {
    pub subscription: SubscriptionId,
    /// Sum of the last good values of every non-skipped network.
    /// Pinned at `U256::MAX` when `overflowed` is set.
    pub total: Quantity,
    /// The sum does not fit in 256 bits.
    pub overflowed: bool,
    /// Most recent success among the contributing networks.
    pub last_updated: Option<DateTime<Utc>>,
    /// Ordered by network id.
    pub per_network: Vec<NetworkView>,
    pub cycles_applied: u64,
}

impl AggregateView {
    pub fn network(&self, network: NetworkId) -> Option<&NetworkView> {
        self.per_network.iter().find(|n| n.network == network)
    }

    /// The total, or `None` if it overflowed.
    pub fn checked_total(&self) -> Option<Quantity> {
        (!self.overflowed).then_some(self.total)
    }

    /// True once any cycle has applied.
    pub fn is_loaded(&self) -> bool {
        self.cycles_applied > 0
    }

    pub fn has_stale(&self) -> bool {
        self.per_network.iter().any(|n| n.stale)
    }

    pub fn failed_networks(&self) -> Vec<NetworkId> {
        self.per_network
            .iter()
            .filter(|n| matches!(n.status, NetworkStatus::Failed { .. }))
            .map(|n| n.network)
            .collect()
    }
}

fn aggregate(subscription: SubscriptionId, slot: &SubscriptionSlot) -> AggregateView {
    let mut total = U256::ZERO;
    let mut overflowed = false;
    let mut last_updated: Option<DateTime<Utc>> = None;
    let mut per_network = Vec::with_capacity(slot.networks.len());

    for (network, entry) in &slot.networks {
        let view = NetworkView {
            network: *network,
            status: entry.status.clone(),
            value: entry.last_good.unwrap_or(U256::ZERO),
            stale: matches!(entry.status, NetworkStatus::Failed { .. }),
            observed_at: entry.observed_at,
            last_success_at: entry.last_good_at,
        };
        if view.contributes() {
            match total.checked_add(view.value) {
                Some(sum) => total = sum,
                None => {
                    total = U256::MAX;
                    overflowed = true;
                }
            }
            if let Some(at) = entry.last_good_at {
                last_updated = Some(last_updated.map_or(at, |prev| prev.max(at)));
            }
        }
        per_network.push(view);
    }

    AggregateView {
        subscription,
        total,
        overflowed,
        last_updated,
        per_network,
        cycles_applied: slot.cycles_applied,
    }
}

/// Shared cache of every subscription's per-network state.
pub struct StateCache {
    slots: RwLock<HashMap<SubscriptionId, SubscriptionSlot>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionId, SubscriptionSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, SubscriptionSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or restart) accepting cycles for a subscription.
    ///
    /// Creates pending entries for `networks` on first activation and keeps
    /// existing values on reactivation. Returns the new epoch.
    pub fn activate(&self, subscription: SubscriptionId, networks: &[NetworkId]) -> u64 {
        let mut slots = self.write();
        let slot = slots.entry(subscription).or_insert_with(|| SubscriptionSlot {
            epoch: 0,
            active: false,
            next_seq: 0,
            last_applied: None,
            cycles_applied: 0,
            networks: BTreeMap::new(),
        });
        for network in networks {
            slot.networks.entry(*network).or_default();
        }
        slot.epoch += 1;
        slot.active = true;
        slot.epoch
    }

    /// Stop accepting cycles. Outstanding tickets become [`ApplyOutcome::Retired`].
    pub fn deactivate(&self, subscription: SubscriptionId) {
        if let Some(slot) = self.write().get_mut(&subscription) {
            slot.epoch += 1;
            slot.active = false;
        }
    }

    /// Drop a subscription and its values.
    pub fn remove(&self, subscription: SubscriptionId) -> bool {
        self.write().remove(&subscription).is_some()
    }

    /// Hand out the next ticket, or `None` if `epoch` is no longer current.
    pub fn begin_cycle(&self, subscription: SubscriptionId, epoch: u64) -> Option<CycleTicket> {
        let mut slots = self.write();
        let slot = slots.get_mut(&subscription)?;
        if !slot.active || slot.epoch != epoch {
            return None;
        }
        let seq = slot.next_seq;
        slot.next_seq += 1;
        Some(CycleTicket {
            subscription,
            epoch,
            seq,
        })
    }

    /// Apply one completed cycle atomically.
    ///
    /// Only networks present in `results` are touched.
    pub fn apply_cycle(&self, ticket: &CycleTicket, results: &[QueryResult]) -> ApplyOutcome {
        let mut slots = self.write();
        let Some(slot) = slots.get_mut(&ticket.subscription) else {
            debug!("Discarding cycle for removed {}", ticket.subscription);
            return ApplyOutcome::Retired;
        };
        if !slot.active || slot.epoch != ticket.epoch {
            debug!(
                "Discarding cycle {} for stopped {}",
                ticket.seq, ticket.subscription
            );
            return ApplyOutcome::Retired;
        }
        if slot.last_applied.is_some_and(|last| ticket.seq <= last) {
            debug!(
                "Discarding cycle {} for {}: cycle {:?} already applied",
                ticket.seq, ticket.subscription, slot.last_applied
            );
            return ApplyOutcome::Superseded;
        }

        for result in results {
            slot.networks.entry(result.network).or_default().record(result);
        }
        slot.last_applied = Some(ticket.seq);
        slot.cycles_applied += 1;
        ApplyOutcome::Applied
    }

    /// Owned copy of a subscription's aggregate.
    pub fn snapshot(&self, subscription: SubscriptionId) -> Option<AggregateView> {
        self.read()
            .get(&subscription)
            .map(|slot| aggregate(subscription, slot))
    }

    pub fn contains(&self, subscription: SubscriptionId) -> bool {
        self.read().contains_key(&subscription)
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: SubscriptionId = SubscriptionId(1);
    const NETWORKS: [NetworkId; 2] = [NetworkId::BASE, NetworkId::ARBITRUM];

    fn one_token() -> Quantity {
        U256::from(1_000_000_000_000_000_000u64)
    }

    fn timeout() -> RpcError {
        RpcError::unreachable("timed out after 10s")
    }

    fn active_cache() -> (StateCache, u64) {
        let cache = StateCache::new();
        let epoch = cache.activate(SUB, &NETWORKS);
        (cache, epoch)
    }

    #[test]
    fn test_pending_before_first_cycle() {
        let (cache, _) = active_cache();
        let view = cache.snapshot(SUB).unwrap();
        assert!(!view.is_loaded());
        assert_eq!(view.total, U256::ZERO);
        assert_eq!(view.per_network.len(), 2);
        assert!(view
            .per_network
            .iter()
            .all(|n| n.status == NetworkStatus::Pending));
        assert!(cache.snapshot(SubscriptionId(99)).is_none());
    }

    #[test]
    fn test_partial_failure_scenario() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        let results = vec![
            QueryResult::value(NetworkId::BASE, crate::abi::decode_quantity("0x0de0b6b3a7640000")),
            QueryResult::failed(NetworkId::ARBITRUM, timeout()),
        ];
        assert_eq!(cache.apply_cycle(&ticket, &results), ApplyOutcome::Applied);

        let view = cache.snapshot(SUB).unwrap();
        assert_eq!(view.total, one_token());
        assert_eq!(view.last_updated, Some(results[0].observed_at));

        let arb = view.network(NetworkId::ARBITRUM).unwrap();
        assert_eq!(arb.status, NetworkStatus::Failed { error: timeout() });
        assert_eq!(arb.value, U256::ZERO);
        assert!(arb.stale);
        assert_eq!(view.failed_networks(), vec![NetworkId::ARBITRUM]);
    }

    #[test]
    fn test_failure_keeps_last_good_value() {
        let (cache, epoch) = active_cache();
        let first = cache.begin_cycle(SUB, epoch).unwrap();
        let good = vec![
            QueryResult::value(NetworkId::BASE, U256::from(10u64)),
            QueryResult::value(NetworkId::ARBITRUM, U256::from(20u64)),
        ];
        cache.apply_cycle(&first, &good);

        let second = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &second,
            &[
                QueryResult::value(NetworkId::BASE, U256::from(11u64)),
                QueryResult::failed(NetworkId::ARBITRUM, timeout()),
            ],
        );

        let view = cache.snapshot(SUB).unwrap();
        // failed network contributes its last good value, tagged stale
        assert_eq!(view.total, U256::from(31u64));
        let arb = view.network(NetworkId::ARBITRUM).unwrap();
        assert_eq!(arb.value, U256::from(20u64));
        assert!(arb.stale);
        assert_eq!(arb.last_success_at, Some(good[1].observed_at));
        let base = view.network(NetworkId::BASE).unwrap();
        assert_eq!(base.value, U256::from(11u64));
        assert!(!base.stale);
        assert!(view.has_stale());
    }

    #[test]
    fn test_failure_does_not_touch_other_networks() {
        let (cache, epoch) = active_cache();
        let first = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &first,
            &[
                QueryResult::value(NetworkId::BASE, U256::from(10u64)),
                QueryResult::value(NetworkId::ARBITRUM, U256::from(20u64)),
            ],
        );
        let before = cache.snapshot(SUB).unwrap();

        let second = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(&second, &[QueryResult::failed(NetworkId::ARBITRUM, timeout())]);
        let after = cache.snapshot(SUB).unwrap();

        assert_eq!(
            before.network(NetworkId::BASE),
            after.network(NetworkId::BASE)
        );
    }

    #[test]
    fn test_skipped_is_excluded_from_total() {
        let (cache, epoch) = active_cache();
        let first = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &first,
            &[
                QueryResult::value(NetworkId::BASE, U256::from(10u64)),
                QueryResult::value(NetworkId::ARBITRUM, U256::from(20u64)),
            ],
        );
        let second = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &second,
            &[
                QueryResult::value(NetworkId::BASE, U256::from(10u64)),
                QueryResult::skipped(NetworkId::ARBITRUM),
            ],
        );

        let view = cache.snapshot(SUB).unwrap();
        assert_eq!(view.total, U256::from(10u64));
        let arb = view.network(NetworkId::ARBITRUM).unwrap();
        assert_eq!(arb.status, NetworkStatus::Skipped);
        // value kept for display
        assert_eq!(arb.value, U256::from(20u64));
        assert!(!arb.stale);
    }

    #[test]
    fn test_total_overflow_is_flagged() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &ticket,
            &[
                QueryResult::value(NetworkId::BASE, U256::MAX),
                QueryResult::value(NetworkId::ARBITRUM, U256::from(5u64)),
            ],
        );

        let view = cache.snapshot(SUB).unwrap();
        assert!(view.overflowed);
        assert_eq!(view.checked_total(), None);
        // per-network values are still exact
        assert_eq!(view.network(NetworkId::BASE).unwrap().value, U256::MAX);
        assert_eq!(view.network(NetworkId::ARBITRUM).unwrap().value, U256::from(5u64));
    }

    #[test]
    fn test_total_at_max_is_not_overflow() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(
            &ticket,
            &[
                QueryResult::value(NetworkId::BASE, U256::MAX - U256::from(5u64)),
                QueryResult::value(NetworkId::ARBITRUM, U256::from(5u64)),
            ],
        );

        let view = cache.snapshot(SUB).unwrap();
        assert!(!view.overflowed);
        assert_eq!(view.checked_total(), Some(U256::MAX));
    }

    #[test]
    fn test_duplicate_apply_is_idempotent() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        let results = vec![
            QueryResult::value(NetworkId::BASE, U256::from(3u64)),
            QueryResult::failed(NetworkId::ARBITRUM, timeout()),
        ];

        assert_eq!(cache.apply_cycle(&ticket, &results), ApplyOutcome::Applied);
        let once = cache.snapshot(SUB).unwrap();
        assert_eq!(cache.apply_cycle(&ticket, &results), ApplyOutcome::Superseded);
        let twice = cache.snapshot(SUB).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_late_older_cycle_is_rejected() {
        let (cache, epoch) = active_cache();
        let cycle1 = cache.begin_cycle(SUB, epoch).unwrap();
        let cycle2 = cache.begin_cycle(SUB, epoch).unwrap();
        assert!(cycle2.seq() > cycle1.seq());

        // cycle 2 finishes first
        let fresh = vec![QueryResult::value(NetworkId::BASE, U256::from(200u64))];
        assert_eq!(cache.apply_cycle(&cycle2, &fresh), ApplyOutcome::Applied);

        let old = vec![QueryResult::value(NetworkId::BASE, U256::from(100u64))];
        assert_eq!(cache.apply_cycle(&cycle1, &old), ApplyOutcome::Superseded);

        let view = cache.snapshot(SUB).unwrap();
        assert_eq!(view.network(NetworkId::BASE).unwrap().value, U256::from(200u64));
        assert_eq!(view.cycles_applied, 1);
    }

    #[test]
    fn test_deactivate_retires_in_flight_cycle() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        let before = cache.snapshot(SUB).unwrap();

        cache.deactivate(SUB);
        let results = vec![QueryResult::value(NetworkId::BASE, U256::from(5u64))];
        assert_eq!(cache.apply_cycle(&ticket, &results), ApplyOutcome::Retired);
        assert_eq!(cache.snapshot(SUB).unwrap(), before);
        assert!(cache.begin_cycle(SUB, epoch).is_none());
    }

    #[test]
    fn test_reactivation_keeps_values() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        cache.apply_cycle(&ticket, &[QueryResult::value(NetworkId::BASE, U256::from(5u64))]);
        cache.deactivate(SUB);

        let epoch2 = cache.activate(SUB, &NETWORKS);
        assert_ne!(epoch, epoch2);
        assert!(cache.begin_cycle(SUB, epoch).is_none());
        let ticket = cache.begin_cycle(SUB, epoch2).unwrap();
        assert!(ticket.seq() > 0);
        assert_eq!(cache.snapshot(SUB).unwrap().total, U256::from(5u64));
    }

    #[test]
    fn test_remove() {
        let (cache, epoch) = active_cache();
        let ticket = cache.begin_cycle(SUB, epoch).unwrap();
        assert!(cache.remove(SUB));
        assert!(!cache.contains(SUB));
        assert_eq!(
            cache.apply_cycle(&ticket, &[QueryResult::value(NetworkId::BASE, U256::from(1u64))]),
            ApplyOutcome::Retired
        );
        assert!(cache.snapshot(SUB).is_none());
    }

    #[test]
    fn test_subscriptions_are_independent() {
        let cache = StateCache::new();
        let a = SubscriptionId(1);
        let b = SubscriptionId(2);
        let epoch_a = cache.activate(a, &[NetworkId::BASE]);
        let epoch_b = cache.activate(b, &[NetworkId::BASE]);

        let ticket_a = cache.begin_cycle(a, epoch_a).unwrap();
        let ticket_b = cache.begin_cycle(b, epoch_b).unwrap();
        cache.apply_cycle(&ticket_b, &[QueryResult::value(NetworkId::BASE, U256::from(2u64))]);
        cache.apply_cycle(&ticket_a, &[QueryResult::value(NetworkId::BASE, U256::from(1u64))]);

        assert_eq!(cache.snapshot(a).unwrap().total, U256::from(1u64));
        assert_eq!(cache.snapshot(b).unwrap().total, U256::from(2u64));
    }
}
