//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{BridgeError, BridgeResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> BridgeResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BridgeError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Native balance of `address` in base units, with failover
    pub async fn get_native_balance(&self, address: Address) -> BridgeResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_balance(address, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        "Failed to get balance from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(BridgeError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed to get balance".to_string(),
        })
    }

    /// Read-only contract call, with failover
    pub async fn call(&self, to: Address, data: Vec<u8>) -> BridgeResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();

        for _ in 0..self.http_providers.len() {
            match self.http().call(&tx, None).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("eth_call failed on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(BridgeError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed eth_call".to_string(),
        })
    }

    /// Confirm the RPC endpoint serves the configured chain
    pub async fn verify_chain_id(&self) -> BridgeResult<()> {
        let reported = self
            .http()
            .get_chainid()
            .await
            .map_err(|e| BridgeError::ChainConnection {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;

        if reported != U256::from(self.config.chain_id) {
            return Err(BridgeError::ChainConnection {
                chain_id: self.config.chain_id,
                message: format!("RPC reports chain id {}", reported),
            });
        }

        Ok(())
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> BridgeResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(BridgeError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }
}
