//! CLI implementation for chainwatch
//!
//! One-shot commands print pretty JSON; `watch` and `pool --watch` keep
//! subscriptions alive and log every fresh snapshot until interrupted.

use crate::abi::{parse_address, parse_selector};
use crate::apr::{AprModel, FixedApr, RewardRateApr};
use crate::cache::{AggregateView, NetworkStatus};
use crate::config::{self, EngineSettings, POOL_INTERVAL};
use crate::engine::{pool_queries, SubscriptionHandle, SyncEngine};
use crate::format::{format_duration, format_percentage, format_token_amount, shorten_address};
use crate::registry::{contracts, ChainRegistry};
use crate::types::{CallKind, NetworkId, Quantity, Query};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fractional digits shown for token amounts.
const DISPLAY_DECIMALS: usize = 4;

/// Multi-chain on-chain state watcher
#[derive(Parser)]
#[command(name = "chainwatch")]
#[command(about = "Query and watch contract state across several EVM networks")]
pub struct Cli {
    /// Registry TOML file; replaces the preset
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Built-in network preset
    #[arg(long, value_enum, default_value = "mainnet", global = true)]
    preset: Preset,

    /// Per-call timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Preset {
    Mainnet,
    Testnet,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the network registry
    Networks,
    /// Fetch a holder's token balance on every network once
    Balance {
        /// Holder address (hex, with or without 0x prefix)
        #[arg(long)]
        holder: String,
        /// Contract name in the registry
        #[arg(long, default_value = contracts::MOR_TOKEN)]
        contract: String,
        /// Comma-separated network ids (default: every registry network)
        #[arg(long, value_delimiter = ',')]
        networks: Vec<u64>,
        /// Token decimals
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    /// Call a custom zero- or one-address-argument view function once
    Call {
        /// Contract name in the registry
        #[arg(long)]
        contract: String,
        /// 4-byte function selector in hex
        #[arg(long)]
        selector: String,
        /// Optional address argument
        #[arg(long)]
        arg: Option<String>,
        /// Comma-separated network ids (default: every registry network)
        #[arg(long, value_delimiter = ',')]
        networks: Vec<u64>,
        /// Decimals used for the formatted value
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    /// Keep balances fresh and log every new snapshot until Ctrl+C
    Watch {
        /// Holder address to watch
        #[arg(long, conflicts_with = "watchlist", required_unless_present = "watchlist")]
        holder: Option<String>,
        /// Watchlist file (one address per line)
        #[arg(short, long)]
        watchlist: Option<PathBuf>,
        /// Contract name in the registry
        #[arg(long, default_value = contracts::MOR_TOKEN)]
        contract: String,
        /// Comma-separated network ids (default: every registry network)
        #[arg(long, value_delimiter = ',')]
        networks: Vec<u64>,
        /// Refresh interval in milliseconds (default from config)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Token decimals
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    /// Summarise a staking pool on one network
    Pool {
        /// Pool contract name in the registry
        #[arg(long, default_value = contracts::CAPITAL_POOL)]
        contract: String,
        /// Network id (default: first registry network)
        #[arg(long)]
        network: Option<u64>,
        /// Also report this holder's stake and pending rewards
        #[arg(long)]
        holder: Option<String>,
        /// Use a constant APR instead of deriving it from the reward rate
        #[arg(long)]
        fixed_apr: Option<f64>,
        /// Keep polling every 30s and log each refresh until Ctrl+C
        #[arg(long)]
        watch: bool,
        /// Token decimals
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
}

/// Build the registry and engine settings from the global flags.
fn load_registry(cli: &Cli) -> Result<(ChainRegistry, EngineSettings)> {
    let (mut registry, mut settings) = match &cli.config {
        Some(path) => {
            let loaded = config::load_registry(path)?;
            (loaded.registry, loaded.settings)
        }
        None => {
            let registry = match cli.preset {
                Preset::Mainnet => ChainRegistry::mainnet(),
                Preset::Testnet => ChainRegistry::testnet(),
            }
            .context("Failed to build preset registry")?;
            (registry, EngineSettings::default())
        }
    };

    for network in config::apply_env_overrides(&mut registry)? {
        info!("RPC URL for network {} taken from environment", network);
    }

    if let Some(secs) = cli.timeout_secs {
        if secs == 0 {
            anyhow::bail!("--timeout-secs must be positive");
        }
        settings.call_timeout = Duration::from_secs(secs);
    }
    Ok((registry, settings))
}

fn target_networks(registry: &ChainRegistry, requested: &[u64]) -> Vec<NetworkId> {
    if requested.is_empty() {
        registry.network_ids()
    } else {
        requested.iter().copied().map(NetworkId).collect()
    }
}

fn network_name(registry: &ChainRegistry, network: NetworkId) -> String {
    registry
        .endpoint(network)
        .map(|e| e.display_name.clone())
        .unwrap_or_else(|| network.to_string())
}

/// JSON rendering of an aggregate with formatted amounts.
fn render_view(registry: &ChainRegistry, view: &AggregateView, decimals: u8) -> Result<Value> {
    let mut networks = Vec::with_capacity(view.per_network.len());
    for entry in &view.per_network {
        networks.push(json!({
            "network": entry.network,
            "name": network_name(registry, entry.network),
            "status": serde_json::to_value(&entry.status)?,
            "value": entry.value.to_string(),
            "formatted": format_token_amount(entry.value, decimals, DISPLAY_DECIMALS),
            "stale": entry.stale,
            "last_success_at": entry.last_success_at,
        }));
    }
    let (total, total_formatted) = match view.checked_total() {
        Some(total) => (
            json!(total.to_string()),
            json!(format_token_amount(total, decimals, DISPLAY_DECIMALS)),
        ),
        None => (Value::Null, Value::Null),
    };
    Ok(json!({
        "total": total,
        "total_formatted": total_formatted,
        "overflowed": view.overflowed,
        "last_updated": view.last_updated,
        "stale": view.has_stale(),
        "networks": networks,
    }))
}

/// Value of a single-network aggregate, or why there is none.
fn single_value(view: &AggregateView, network: NetworkId) -> std::result::Result<Quantity, String> {
    let Some(entry) = view.network(network) else {
        return Err("no result".to_string());
    };
    match &entry.status {
        NetworkStatus::Ok => Ok(entry.value),
        NetworkStatus::Failed { error } => Err(error.to_string()),
        NetworkStatus::Skipped => Err("contract not deployed on this network".to_string()),
        NetworkStatus::Pending => Err("no result".to_string()),
    }
}

fn amount_json(value: std::result::Result<Quantity, String>, decimals: u8) -> Value {
    match value {
        Ok(q) => json!({
            "value": q.to_string(),
            "formatted": format_token_amount(q, decimals, DISPLAY_DECIMALS),
        }),
        Err(error) => json!({ "error": error }),
    }
}

/// Staking pool reads on one network.
struct PoolTarget<'a> {
    contract: &'a str,
    network: NetworkId,
    holder: Option<Address>,
    apr_model: &'a dyn AprModel,
    decimals: u8,
}

async fn run_pool(engine: &SyncEngine, target: &PoolTarget<'_>) -> Result<Value> {
    let queries = pool_queries(target.contract, target.holder);
    let targets = [target.network];
    let views = join_all(queries.iter().map(|q| engine.fetch_once(q, &targets))).await;
    let mut values = Vec::with_capacity(views.len());
    for view in views {
        values.push(single_value(&view?, target.network));
    }
    Ok(pool_report(engine.registry(), target, &values))
}

async fn run_pool_watch(engine: &SyncEngine, target: &PoolTarget<'_>) -> Result<()> {
    let pool = engine
        .subscribe_pool(target.contract, &[target.network], target.holder)
        .with_context(|| format!("Failed to subscribe to {}", target.contract))?;
    let handles = pool.handles();
    info!(
        "Watching {} on {}, refreshing every {}",
        target.contract,
        network_name(engine.registry(), target.network),
        format_duration(POOL_INTERVAL.as_secs())
    );

    let report = async {
        let mut last_cycles = 0;
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            let views: Vec<AggregateView> =
                handles.iter().filter_map(|h| engine.snapshot(*h)).collect();
            if views.len() != handles.len() || !views.iter().all(AggregateView::is_loaded) {
                continue;
            }
            let cycles: u64 = views.iter().map(|v| v.cycles_applied).sum();
            if cycles == last_cycles {
                continue;
            }
            last_cycles = cycles;

            let values: Vec<_> = views
                .iter()
                .map(|v| single_value(v, target.network))
                .collect();
            info!("{}", pool_report(engine.registry(), target, &values));
        }
    };

    tokio::select! {
        _ = report => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    for handle in handles {
        engine.unsubscribe(handle)?;
    }
    Ok(())
}

/// JSON summary of a pool from values in `pool_queries` order.
fn pool_report(
    registry: &ChainRegistry,
    target: &PoolTarget<'_>,
    values: &[std::result::Result<Quantity, String>],
) -> Value {
    let decimals = target.decimals;
    let network = target.network;
    let contract = target.contract;
    let apr_model = target.apr_model;
    let holder = target.holder;

    let value_at = |i: usize| {
        values
            .get(i)
            .cloned()
            .unwrap_or_else(|| Err("no result".to_string()))
    };
    let total_staked = value_at(0);
    let reward_rate = value_at(1);
    let apr = match (&reward_rate, &total_staked) {
        (Ok(rate), Ok(staked)) => json!(format_percentage(apr_model.apr(*rate, *staked), 2)),
        _ => Value::Null,
    };

    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let period = match &value_at(2) {
        Ok(finish) => {
            let finish = u64::try_from(*finish).unwrap_or(u64::MAX);
            json!({
                "period_finish": finish,
                "remaining": format_duration(finish.saturating_sub(now)),
            })
        }
        Err(error) => json!({ "error": error }),
    };

    let address = registry.contract(network, contract);
    let explorer = match (registry.endpoint(network), address) {
        (Some(endpoint), Some(address)) => json!(endpoint.address_url(address)),
        _ => Value::Null,
    };

    let mut result = json!({
        "network": network,
        "name": network_name(registry, network),
        "contract": contract,
        "explorer": explorer,
        "total_staked": amount_json(total_staked, decimals),
        "reward_rate": amount_json(reward_rate, decimals),
        "apr": apr,
        "period": period,
    });
    if let (Some(holder), Some(staked), Some(earned)) = (holder, values.get(3), values.get(4)) {
        result["holder"] = json!({
            "address": format!("0x{:x}", holder),
            "staked": amount_json(staked.clone(), decimals),
            "earned": amount_json(earned.clone(), decimals),
        });
    }
    result
}

async fn run_watch(
    engine: &SyncEngine,
    holders: Vec<Address>,
    contract: String,
    networks: Vec<NetworkId>,
    interval: Duration,
    decimals: u8,
) -> Result<()> {
    let mut subscriptions: Vec<(Address, SubscriptionHandle)> = Vec::with_capacity(holders.len());
    for holder in holders {
        let handle = engine
            .subscribe(Query::token_balance(&contract, holder), &networks, Some(interval))
            .with_context(|| format!("Failed to subscribe 0x{:x}", holder))?;
        subscriptions.push((holder, handle));
    }
    info!(
        "Watching {} holder(s) of {} on {} network(s), refreshing every {}",
        subscriptions.len(),
        contract,
        networks.len(),
        format_duration(interval.as_secs())
    );

    let report = async {
        let mut seen: HashMap<SubscriptionHandle, u64> = HashMap::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            for (holder, handle) in &subscriptions {
                let Some(view) = engine.snapshot(*handle) else {
                    continue;
                };
                let last = seen.entry(*handle).or_default();
                if view.cycles_applied == *last {
                    continue;
                }
                *last = view.cycles_applied;

                match view.checked_total() {
                    Some(total) => info!(
                        "{} {}: {}",
                        shorten_address(&format!("0x{:x}", holder)),
                        contract,
                        format_token_amount(total, decimals, DISPLAY_DECIMALS)
                    ),
                    None => warn!(
                        "{} {}: total exceeds 256 bits",
                        shorten_address(&format!("0x{:x}", holder)),
                        contract
                    ),
                }
                for network in view.failed_networks() {
                    warn!(
                        "{} {}: {} failing, showing last known value",
                        shorten_address(&format!("0x{:x}", holder)),
                        contract,
                        network_name(engine.registry(), network)
                    );
                }
            }
        }
    };

    tokio::select! {
        _ = report => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    for (_, handle) in subscriptions {
        engine.unsubscribe(handle)?;
    }
    Ok(())
}

/// Run the CLI command and print JSON output.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let (registry, settings) = load_registry(&cli)?;
    let registry = Arc::new(registry);
    let engine = SyncEngine::with_rpc(registry.clone(), settings)?;

    let result = match cli.command {
        Commands::Networks => {
            let mut networks = Vec::new();
            for endpoint in registry.networks() {
                networks.push(json!({
                    "endpoint": serde_json::to_value(endpoint)?,
                    "contracts": registry.contracts().for_network(endpoint.network),
                }));
            }
            json!({ "networks": networks })
        }
        Commands::Balance {
            holder,
            contract,
            networks,
            decimals,
        } => {
            let holder = parse_address(&holder).context("Invalid holder address")?;
            let networks = target_networks(&registry, &networks);
            let query = Query::token_balance(contract, holder);
            let view = engine.fetch_once(&query, &networks).await?;
            let mut out = render_view(&registry, &view, decimals)?;
            out["query"] = json!(query.to_string());
            out
        }
        Commands::Call {
            contract,
            selector,
            arg,
            networks,
            decimals,
        } => {
            let selector = parse_selector(&selector).context("Invalid selector")?;
            let arg = arg
                .map(|a| parse_address(&a))
                .transpose()
                .context("Invalid address argument")?;
            let networks = target_networks(&registry, &networks);
            let query = Query::new(contract, CallKind::Custom { selector, arg });
            let view = engine.fetch_once(&query, &networks).await?;
            let mut out = render_view(&registry, &view, decimals)?;
            out["query"] = json!(query.to_string());
            out
        }
        Commands::Watch {
            holder,
            watchlist,
            contract,
            networks,
            interval_ms,
            decimals,
        } => {
            let holders = match (holder, watchlist) {
                (Some(holder), _) => {
                    vec![parse_address(&holder).context("Invalid holder address")?]
                }
                (None, Some(path)) => config::load_watchlist(&path)?,
                (None, None) => anyhow::bail!("Either --holder or --watchlist is required"),
            };
            let networks = target_networks(&registry, &networks);
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(settings.default_interval);
            run_watch(&engine, holders, contract, networks, interval, decimals).await?;
            return Ok(());
        }
        Commands::Pool {
            contract,
            network,
            holder,
            fixed_apr,
            watch,
            decimals,
        } => {
            let network = match network {
                Some(id) => NetworkId(id),
                None => registry
                    .network_ids()
                    .first()
                    .copied()
                    .context("Registry has no networks")?,
            };
            let holder = holder
                .map(|h| parse_address(&h))
                .transpose()
                .context("Invalid holder address")?;
            let apr_model: Box<dyn AprModel> = match fixed_apr {
                Some(apr) => Box::new(FixedApr(apr)),
                None => Box::new(RewardRateApr),
            };
            let target = PoolTarget {
                contract: &contract,
                network,
                holder,
                apr_model: apr_model.as_ref(),
                decimals,
            };
            if watch {
                run_pool_watch(&engine, &target).await?;
                return Ok(());
            }
            run_pool(&engine, &target).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
