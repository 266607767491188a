//! Configuration loading
//!
//! Engine settings, the TOML network registry file, per-network RPC URL
//! overrides from the environment, and the holder watchlist file.
//!
//! # Example registry file:
//! ```toml
//! call_timeout_secs = 10
//! default_interval_ms = 60000
//!
//! [[networks]]
//! id = 8453
//! name = "Base"
//! rpc_url = "https://mainnet.base.org"
//! explorer_url = "https://basescan.org"
//!
//! [networks.contracts]
//! MORToken = "0x093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F"
//! ```

use crate::abi::parse_address;
use crate::registry::{ChainRegistry, EndpointConfig};
use crate::types::NetworkId;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for RPC URL overrides, e.g. `CHAINWATCH_RPC_URL_8453`.
pub const RPC_URL_ENV_PREFIX: &str = "CHAINWATCH_RPC_URL_";

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Default refresh interval for balance subscriptions.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Refresh interval for pool and staking subscriptions.
pub const POOL_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime knobs shared by every subscription of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound on a single `eth_call`.
    pub call_timeout: Duration,
    /// Interval used when a subscription does not ask for one.
    pub default_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            default_interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    call_timeout_secs: Option<u64>,
    #[serde(default)]
    default_interval_ms: Option<u64>,
    #[serde(default)]
    networks: Vec<NetworkEntry>,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    id: u64,
    name: String,
    rpc_url: String,
    #[serde(default)]
    explorer_url: String,
    #[serde(default = "default_currency_symbol")]
    currency_symbol: String,
    #[serde(default = "default_currency_decimals")]
    currency_decimals: u8,
    #[serde(default)]
    contracts: BTreeMap<String, String>,
}

fn default_currency_symbol() -> String {
    "ETH".to_string()
}

fn default_currency_decimals() -> u8 {
    18
}

/// Registry and settings loaded from a file.
#[derive(Debug)]
pub struct LoadedConfig {
    pub registry: ChainRegistry,
    pub settings: EngineSettings,
}

/// Parse a registry file's contents.
pub fn parse_registry(contents: &str) -> Result<LoadedConfig> {
    let file: RegistryFile = toml::from_str(contents).context("Invalid registry TOML")?;
    if file.networks.is_empty() {
        anyhow::bail!("Registry defines no networks");
    }

    let mut registry = ChainRegistry::new();
    for entry in file.networks {
        let network = NetworkId(entry.id);
        registry
            .add_network(EndpointConfig {
                network,
                rpc_url: entry.rpc_url,
                display_name: entry.name,
                explorer_url: entry.explorer_url,
                native_currency_symbol: entry.currency_symbol,
                native_currency_decimals: entry.currency_decimals,
            })
            .with_context(|| format!("Failed to register network {}", network))?;

        for (name, address) in &entry.contracts {
            registry
                .add_contract(network, name, address)
                .with_context(|| format!("Failed to register {} on network {}", name, network))?;
        }
    }

    let mut settings = EngineSettings::default();
    if let Some(secs) = file.call_timeout_secs {
        if secs == 0 {
            anyhow::bail!("call_timeout_secs must be positive");
        }
        settings.call_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = file.default_interval_ms {
        if ms == 0 {
            anyhow::bail!("default_interval_ms must be positive");
        }
        settings.default_interval = Duration::from_millis(ms);
    }

    Ok(LoadedConfig { registry, settings })
}

/// Load a registry file from disk.
pub fn load_registry(path: &Path) -> Result<LoadedConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read registry file: {:?}", path))?;
    parse_registry(&contents).with_context(|| format!("Failed to load registry from {:?}", path))
}

/// Apply `CHAINWATCH_RPC_URL_<id>` overrides from the process environment.
///
/// Returns the networks whose URL was replaced.
pub fn apply_env_overrides(registry: &mut ChainRegistry) -> Result<Vec<NetworkId>> {
    apply_rpc_overrides(registry, |network| {
        std::env::var(format!("{}{}", RPC_URL_ENV_PREFIX, network.0)).ok()
    })
}

fn apply_rpc_overrides<F>(registry: &mut ChainRegistry, lookup: F) -> Result<Vec<NetworkId>>
where
    F: Fn(NetworkId) -> Option<String>,
{
    let mut overridden = Vec::new();
    for network in registry.network_ids() {
        if let Some(url) = lookup(network) {
            let url = url.trim().to_string();
            if url.is_empty() {
                continue;
            }
            registry.set_rpc_url(network, url)?;
            overridden.push(network);
        }
    }
    Ok(overridden)
}

/// Load a holder watchlist from a file.
///
/// Each line should contain one address in hex format (with or without 0x prefix).
/// Empty lines and lines starting with '#' are ignored.
pub fn load_watchlist(path: &Path) -> Result<Vec<Address>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read watchlist file: {:?}", path))?;

    let mut addresses = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let addr = parse_address(line)
            .with_context(|| format!("Invalid address on line {}: {}", line_num + 1, line))?;

        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }

    if addresses.is_empty() {
        anyhow::bail!("Watchlist is empty (no valid addresses found)");
    }

    Ok(addresses)
}
