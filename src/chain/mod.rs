//! Chain module - chain identity, wallet access and RPC connections
//!
//! This module provides:
//! - Chain ids, chain families and the supported chain catalog
//! - Native asset sentinels and address format checks per family
//! - Multi-RPC provider management with automatic failover
//! - The wallet/account provider used for chain switches and signing

pub mod erc20;
pub mod provider;
pub mod wallet;

pub use provider::ChainProvider;
pub use wallet::{RpcWallet, WalletProvider};

use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Numeric network identifier
pub type ChainId = u64;

/// The distinguished non-EVM network
pub const SOLANA_CHAIN_ID: ChainId = 1151111081099710;

/// Native asset sentinel on EVM chains
pub const EVM_NATIVE_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Native SOL sentinel
pub const SOLANA_NATIVE_ADDRESS: &str = "11111111111111111111111111111111";

lazy_static! {
    static ref EVM_ADDRESS: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex");
    static ref SOLANA_ADDRESS: Regex =
        Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("valid regex");
}

/// Address format family of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Solana,
}

impl ChainFamily {
    pub fn of(chain_id: ChainId) -> Self {
        if chain_id == SOLANA_CHAIN_ID {
            ChainFamily::Solana
        } else {
            ChainFamily::Evm
        }
    }

    /// Sentinel address denoting the family's native asset
    pub fn native_address(self) -> &'static str {
        match self {
            ChainFamily::Evm => EVM_NATIVE_ADDRESS,
            ChainFamily::Solana => SOLANA_NATIVE_ADDRESS,
        }
    }

    /// Check an address against the family's address format
    pub fn is_valid_address(self, address: &str) -> bool {
        match self {
            ChainFamily::Evm => EVM_ADDRESS.is_match(address),
            ChainFamily::Solana => SOLANA_ADDRESS.is_match(address),
        }
    }
}

/// True when `address` is the native asset sentinel for `chain_id`
pub fn is_native_token(chain_id: ChainId, address: &str) -> bool {
    address.eq_ignore_ascii_case(ChainFamily::of(chain_id).native_address())
}

/// Catalog entry for a supported chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub id: ChainId,
    pub key: &'static str,
    pub name: &'static str,
    pub coin: &'static str,
}

const fn chain(id: ChainId, key: &'static str, name: &'static str, coin: &'static str) -> ChainInfo {
    ChainInfo { id, key, name, coin }
}

/// Chains offered for selection
pub static SUPPORTED_CHAINS: &[ChainInfo] = &[
    chain(1, "eth", "Ethereum", "ETH"),
    chain(SOLANA_CHAIN_ID, "sol", "Solana", "SOL"),
    chain(42161, "arb", "Arbitrum", "ETH"),
    chain(8453, "bas", "Base", "ETH"),
    chain(81457, "bls", "Blast", "ETH"),
    chain(43114, "ava", "Avalanche", "AVAX"),
    chain(137, "pol", "Polygon", "POL"),
    chain(534352, "scl", "Scroll", "ETH"),
    chain(10, "opt", "Optimism", "ETH"),
    chain(59144, "lna", "Linea", "ETH"),
    chain(324, "era", "zkSync", "ETH"),
    chain(1101, "pze", "Polygon zkEVM", "ETH"),
    chain(56, "bsc", "BSC", "BNB"),
    chain(100, "dai", "Gnosis", "DAI"),
    chain(250, "ftm", "Fantom", "FTM"),
    chain(34443, "mod", "Mode", "ETH"),
    chain(1088, "mam", "Metis", "METIS"),
    chain(130, "uni", "Unichain", "ETH"),
    chain(146, "son", "Sonic", "S"),
    chain(5000, "mnt", "Mantle", "MNT"),
    chain(80094, "ber", "Berachain", "BERA"),
    chain(999, "hyp", "HyperEVM", "HYPE"),
];

/// Look up a chain in the catalog
pub fn chain_info(chain_id: ChainId) -> Option<&'static ChainInfo> {
    SUPPORTED_CHAINS.iter().find(|c| c.id == chain_id)
}

/// Chains whose name or native coin contains `search` (case-insensitive)
pub fn search_chains(search: &str) -> Vec<&'static ChainInfo> {
    let needle = search.trim().to_lowercase();
    SUPPORTED_CHAINS
        .iter()
        .filter(|c| {
            needle.is_empty()
                || c.name.to_lowercase().contains(&needle)
                || c.coin.to_lowercase().contains(&needle)
        })
        .collect()
}

/// RPC providers for every configured chain
pub struct ChainRegistry {
    /// Chain providers indexed by chain ID
    providers: DashMap<ChainId, Arc<ChainProvider>>,
}

impl ChainRegistry {
    /// Create providers for all enabled chains
    pub fn new(settings: &Settings) -> BridgeResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            match ChainProvider::new(chain_config.clone()) {
                Ok(provider) => {
                    info!(
                        "Initialized chain {} (ID: {})",
                        chain_config.name, chain_config.chain_id
                    );
                    providers.insert(chain_config.chain_id, Arc::new(provider));
                }
                Err(e) => {
                    warn!("Skipping chain {}: {}", name, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(BridgeError::Config(
                "No chain could be initialized".to_string(),
            ));
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: ChainId) -> BridgeResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(BridgeError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(ChainId, bool)> {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(providers.len());
        for (chain_id, provider) in providers {
            let healthy = provider.health_check().await;
            crate::metrics::record_chain_health(chain_id, healthy);
            results.push((chain_id, healthy));
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<_> = self.providers.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }
}
