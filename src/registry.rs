//! Chain endpoint registry
//!
//! Maps each supported network to its RPC endpoint, explorer and native
//! currency, and to the addresses of the contracts deployed on it. A
//! registry is built once at startup and shared read-only (`Arc`) by every
//! component; separate registries (mainnet, testnet) can coexist.

use crate::abi::parse_address;
use crate::error::ConfigError;
use crate::types::NetworkId;
use alloy_primitives::{Address, B256};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Logical contract names used by the built-in presets.
pub mod contracts {
    pub const MOR_TOKEN: &str = "MORToken";
    pub const BUILDER_CONTRACT: &str = "BuilderContract";
    pub const REWARD_POOL_V4: &str = "RewardPoolV4";
    pub const CAPITAL_POOL: &str = "CapitalPool";
    pub const STAKING_REWARDS: &str = "StakingRewards";
    pub const MULTI_SIG: &str = "MultiSig";
}

/// Connection and display metadata for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    pub network: NetworkId,
    pub rpc_url: String,
    pub display_name: String,
    pub explorer_url: String,
    pub native_currency_symbol: String,
    pub native_currency_decimals: u8,
}

impl EndpointConfig {
    /// Explorer page for an address.
    pub fn address_url(&self, address: Address) -> String {
        format!("{}/address/0x{:x}", self.explorer_url.trim_end_matches('/'), address)
    }

    /// Explorer page for a transaction.
    pub fn tx_url(&self, tx_hash: B256) -> String {
        format!("{}/tx/0x{:x}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// Contract addresses per network, keyed by logical contract name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContractSet {
    by_network: HashMap<NetworkId, BTreeMap<String, Address>>,
}

impl ContractSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: NetworkId, name: impl Into<String>, address: Address) {
        self.by_network
            .entry(network)
            .or_default()
            .insert(name.into(), address);
    }

    /// Address of `name` on `network`, if deployed there.
    pub fn get(&self, network: NetworkId, name: &str) -> Option<Address> {
        self.by_network.get(&network)?.get(name).copied()
    }

    pub fn for_network(&self, network: NetworkId) -> Option<&BTreeMap<String, Address>> {
        self.by_network.get(&network)
    }
}

/// Supported networks and their contracts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainRegistry {
    endpoints: BTreeMap<NetworkId, EndpointConfig>,
    contracts: ContractSet,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network. Each network id may only be registered once.
    pub fn add_network(&mut self, endpoint: EndpointConfig) -> Result<(), ConfigError> {
        let network = endpoint.network;
        if self.endpoints.contains_key(&network) {
            return Err(ConfigError::DuplicateNetwork(network));
        }
        self.endpoints.insert(network, endpoint);
        Ok(())
    }

    /// Register a contract address on an already registered network.
    pub fn add_contract(
        &mut self,
        network: NetworkId,
        name: &str,
        address: &str,
    ) -> Result<(), ConfigError> {
        self.require(network)?;
        let address = parse_address(address).map_err(|source| ConfigError::InvalidContractAddress {
            network,
            contract: name.to_string(),
            source,
        })?;
        self.contracts.insert(network, name, address);
        Ok(())
    }

    pub fn endpoint(&self, network: NetworkId) -> Option<&EndpointConfig> {
        self.endpoints.get(&network)
    }

    /// Like [`endpoint`](Self::endpoint), failing with `UnsupportedNetwork`.
    pub fn require(&self, network: NetworkId) -> Result<&EndpointConfig, ConfigError> {
        self.endpoints
            .get(&network)
            .ok_or(ConfigError::UnsupportedNetwork(network))
    }

    /// Check that every requested network is supported.
    pub fn validate(&self, networks: &[NetworkId]) -> Result<(), ConfigError> {
        if networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        for network in networks {
            self.require(*network)?;
        }
        Ok(())
    }

    pub fn contract(&self, network: NetworkId, name: &str) -> Option<Address> {
        self.contracts.get(network, name)
    }

    pub fn contracts(&self) -> &ContractSet {
        &self.contracts
    }

    /// Supported networks in ascending id order.
    pub fn networks(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.values()
    }

    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.endpoints.keys().copied().collect()
    }

    /// Replace a network's RPC URL (used for environment overrides).
    pub fn set_rpc_url(&mut self, network: NetworkId, rpc_url: String) -> Result<(), ConfigError> {
        let endpoint = self
            .endpoints
            .get_mut(&network)
            .ok_or(ConfigError::UnsupportedNetwork(network))?;
        endpoint.rpc_url = rpc_url;
        Ok(())
    }

    /// Base and Arbitrum mainnet.
    pub fn mainnet() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.add_network(eth_network(
            NetworkId::BASE,
            "Base",
            "https://mainnet.base.org",
            "https://basescan.org",
        ))?;
        registry.add_network(eth_network(
            NetworkId::ARBITRUM,
            "Arbitrum",
            "https://arb1.arbitrum.io/rpc",
            "https://arbiscan.io",
        ))?;

        let base = [
            (contracts::MOR_TOKEN, "0x093D6B75b07d61C5fA754C20F8c4E4dFD6C02e7F"),
            (contracts::BUILDER_CONTRACT, "0x33BAc5F497352c4F93b4b27F7dC1A7cC97C3A846"),
            (contracts::REWARD_POOL_V4, "0xF4F9555E616a3F2A6fF3b23e7E9e5C8c8C8C8C8C"),
            (contracts::CAPITAL_POOL, "0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC"),
            (contracts::STAKING_REWARDS, "0xDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDD"),
            (contracts::MULTI_SIG, "0xEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEEE"),
        ];
        let arbitrum = [
            (contracts::MOR_TOKEN, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            (contracts::BUILDER_CONTRACT, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            (contracts::REWARD_POOL_V4, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            (contracts::CAPITAL_POOL, "0xcccccccccccccccccccccccccccccccccccccccc"),
            (contracts::STAKING_REWARDS, "0xdddddddddddddddddddddddddddddddddddddddd"),
            (contracts::MULTI_SIG, "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"),
        ];
        for (name, addr) in base {
            registry.add_contract(NetworkId::BASE, name, addr)?;
        }
        for (name, addr) in arbitrum {
            registry.add_contract(NetworkId::ARBITRUM, name, addr)?;
        }
        Ok(registry)
    }

    /// Base Sepolia.
    pub fn testnet() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.add_network(eth_network(
            NetworkId::BASE_SEPOLIA,
            "Base Sepolia",
            "https://sepolia.base.org",
            "https://sepolia.basescan.org",
        ))?;
        let sepolia = [
            (contracts::MOR_TOKEN, "0x4200000000000000000000000000000000000006"),
            (contracts::BUILDER_CONTRACT, "0x4200000000000000000000000000000000000007"),
            (contracts::REWARD_POOL_V4, "0x4200000000000000000000000000000000000008"),
            (contracts::CAPITAL_POOL, "0x4200000000000000000000000000000000000009"),
            (contracts::STAKING_REWARDS, "0x4200000000000000000000000000000000000010"),
            (contracts::MULTI_SIG, "0x4200000000000000000000000000000000000011"),
        ];
        for (name, addr) in sepolia {
            registry.add_contract(NetworkId::BASE_SEPOLIA, name, addr)?;
        }
        Ok(registry)
    }
}

fn eth_network(network: NetworkId, name: &str, rpc_url: &str, explorer_url: &str) -> EndpointConfig {
    EndpointConfig {
        network,
        rpc_url: rpc_url.to_string(),
        display_name: name.to_string(),
        explorer_url: explorer_url.to_string(),
        native_currency_symbol: "ETH".to_string(),
        native_currency_decimals: 18,
    }
}
