//! Subscription polling
//!
//! A [`Poller`] owns the schedule of one subscription. While active it runs a
//! background task that fetches immediately, then re-arms a fixed delay
//! measured from the end of each cycle, so cycles of one subscription never
//! overlap. Stopping is cooperative and returns at once; the cache epoch is
//! retired before the task is signalled, so nothing fetched afterwards lands.

use crate::cache::{ApplyOutcome, StateCache};
use crate::fetcher::MultiChainFetcher;
use crate::types::{NetworkId, Query, Subscription, SubscriptionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No timer armed.
    Idle,
    /// Background task running, next cycle pending.
    Active,
}

struct ActivePoll {
    stop_tx: watch::Sender<bool>,
    refresh: Arc<Notify>,
    // detached on stop; the task exits on its own
    _task: JoinHandle<()>,
}

/// Scheduler for one subscription.
pub struct Poller {
    subscription: Subscription,
    fetcher: Arc<MultiChainFetcher>,
    cache: Arc<StateCache>,
    active: Option<ActivePoll>,
}

impl Poller {
    pub fn new(
        subscription: Subscription,
        fetcher: Arc<MultiChainFetcher>,
        cache: Arc<StateCache>,
    ) -> Self {
        Self {
            subscription,
            fetcher,
            cache,
            active: None,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn state(&self) -> PollerState {
        if self.active.is_some() {
            PollerState::Active
        } else {
            PollerState::Idle
        }
    }

    /// Idle → Active. Runs one cycle right away, then every `interval`.
    ///
    /// Must be called from within a Tokio runtime. No-op when already active.
    pub fn start(&mut self) {
        if self.active.is_some() {
            return;
        }

        let sub = &self.subscription;
        let epoch = self.cache.activate(sub.id, &sub.networks);
        let (stop_tx, stop_rx) = watch::channel(false);
        let refresh = Arc::new(Notify::new());

        let runner = CycleRunner {
            id: sub.id,
            query: sub.query.clone(),
            networks: sub.networks.clone(),
            interval: sub.interval,
            epoch,
            fetcher: self.fetcher.clone(),
            cache: self.cache.clone(),
        };
        let task = tokio::spawn(runner.run(stop_rx, refresh.clone()));

        info!(
            "Started polling {} ({}) on {} networks every {:?}",
            sub.id,
            sub.query,
            sub.networks.len(),
            sub.interval
        );
        self.subscription.enabled = true;
        self.active = Some(ActivePoll {
            stop_tx,
            refresh,
            _task: task,
        });
    }

    /// Active → Idle without waiting for in-flight calls.
    ///
    /// Once this returns, no cycle of this subscription changes the cache.
    pub fn stop(&mut self) {
        self.subscription.enabled = false;
        let Some(active) = self.active.take() else {
            return;
        };
        self.cache.deactivate(self.subscription.id);
        // receiver may already be gone if the task exited
        let _ = active.stop_tx.send(true);
        info!("Stopped polling {}", self.subscription.id);
    }

    /// `false` stops; `true` starts when idle and is a no-op when active.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Run one extra cycle now, keeping the scheduled fire time.
    ///
    /// Returns `false` when the poller is idle.
    pub fn force_refresh(&self) -> bool {
        match &self.active {
            Some(active) => {
                active.refresh.notify_one();
                true
            }
            None => false,
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CycleRunner {
    id: SubscriptionId,
    query: Query,
    networks: Vec<NetworkId>,
    interval: Duration,
    epoch: u64,
    fetcher: Arc<MultiChainFetcher>,
    cache: Arc<StateCache>,
}

impl CycleRunner {
    async fn run(self, mut stop_rx: watch::Receiver<bool>, refresh: Arc<Notify>) {
        let mut next_fire = Instant::now();

        loop {
            let forced = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = time::sleep_until(next_fire) => false,
                _ = refresh.notified() => true,
            };

            let Some(ticket) = self.cache.begin_cycle(self.id, self.epoch) else {
                break;
            };
            debug!("{} cycle {} started (forced: {})", self.id, ticket.seq(), forced);

            let results = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                results = self.fetcher.fetch_all(&self.query, &self.networks) => results,
            };

            let failed = results.iter().filter(|r| !r.is_success()).count();
            match self.cache.apply_cycle(&ticket, &results) {
                ApplyOutcome::Applied => debug!(
                    "{} cycle {} applied ({} of {} networks not ok)",
                    self.id,
                    ticket.seq(),
                    failed,
                    results.len()
                ),
                ApplyOutcome::Superseded => {}
                ApplyOutcome::Retired => break,
            }

            // fixed delay from the end of a scheduled cycle; forced cycles keep the phase
            if !forced {
                next_fire = Instant::now() + self.interval;
            }
        }

        debug!("{} polling task exited", self.id);
    }
}
