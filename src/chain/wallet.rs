//! Wallet/account provider: connected account, chain switching and signing

use super::{ChainFamily, ChainId, ChainRegistry};
use crate::config::WalletConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::quote::StepTransaction;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Account and signing capabilities of the connected wallet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Address of the connected account, if any
    async fn current_account(&self) -> Option<String>;

    /// Point the wallet at `chain_id`
    async fn switch_chain(&self, chain_id: ChainId) -> BridgeResult<()>;

    /// Whether the wallet can operate on chains of `family`
    fn supports(&self, family: ChainFamily) -> bool;

    /// Sign and broadcast a transaction, returning its hash
    async fn send_transaction(&self, chain_id: ChainId, tx: &StepTransaction)
        -> BridgeResult<String>;

    /// Wait until a broadcast transaction is mined successfully
    async fn wait_for_transaction(&self, chain_id: ChainId, tx_hash: &str) -> BridgeResult<()>;
}

/// EVM wallet backed by a local key (or a watch-only address) and the RPC registry
pub struct RpcWallet {
    registry: Arc<ChainRegistry>,
    signer: Option<LocalWallet>,
    address: Option<Address>,
    active_chain: RwLock<Option<ChainId>>,
}

impl RpcWallet {
    /// Create a wallet from configuration
    pub fn new(config: &WalletConfig, registry: Arc<ChainRegistry>) -> BridgeResult<Self> {
        let signer = Self::load_signer(config)?;

        let address = match (&signer, &config.address) {
            (Some(signer), _) => Some(signer.address()),
            (None, Some(address)) => Some(
                address
                    .parse::<Address>()
                    .map_err(|e| BridgeError::Config(format!("Invalid wallet address: {}", e)))?,
            ),
            (None, None) => None,
        };

        match (&signer, address) {
            (Some(_), Some(address)) => info!("Wallet loaded with signing key: {:?}", address),
            (None, Some(address)) => info!("Wallet loaded watch-only: {:?}", address),
            _ => info!("No wallet account configured"),
        }

        Ok(Self {
            registry,
            signer,
            address,
            active_chain: RwLock::new(None),
        })
    }

    /// Load the signing key from the configured environment variable
    fn load_signer(config: &WalletConfig) -> BridgeResult<Option<LocalWallet>> {
        let Some(var) = config.private_key_env.as_deref() else {
            return Ok(None);
        };

        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => key
                .trim()
                .parse::<LocalWallet>()
                .map(Some)
                .map_err(|e| BridgeError::Wallet(format!("Invalid private key: {}", e))),
            _ => Ok(None),
        }
    }

    /// Chain the wallet is currently pointed at
    pub async fn active_chain(&self) -> Option<ChainId> {
        *self.active_chain.read().await
    }

    fn build_transaction(&self, tx: &StepTransaction) -> BridgeResult<TransactionRequest> {
        let to: Address = tx
            .to
            .parse()
            .map_err(|e| BridgeError::Execution(format!("Invalid transaction target: {}", e)))?;
        let data = hex::decode(tx.data.trim_start_matches("0x"))
            .map_err(|e| BridgeError::Execution(format!("Invalid transaction data: {}", e)))?;

        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(value) = tx.value.as_deref() {
            request = request.value(parse_quantity(value)?);
        }
        if let Some(gas) = tx.gas_limit.as_deref() {
            request = request.gas(parse_quantity(gas)?);
        }
        if let Some(price) = tx.gas_price.as_deref() {
            request = request.gas_price(parse_quantity(price)?);
        }

        Ok(request)
    }
}

/// Parse a `0x`-prefixed hex or decimal quantity
fn parse_quantity(value: &str) -> BridgeResult<U256> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x") {
        Some(hex_digits) if hex_digits.is_empty() => Ok(U256::zero()),
        Some(hex_digits) => U256::from_str_radix(hex_digits, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(value).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| BridgeError::Execution(format!("Invalid quantity {}: {}", value, e)))
}

#[async_trait]
impl WalletProvider for RpcWallet {
    async fn current_account(&self) -> Option<String> {
        self.address.map(|address| format!("{:?}", address))
    }

    async fn switch_chain(&self, chain_id: ChainId) -> BridgeResult<()> {
        if !self.supports(ChainFamily::of(chain_id)) {
            return Err(BridgeError::UnsupportedChainFamily { chain_id });
        }

        let provider = self
            .registry
            .get_provider(chain_id)
            .map_err(|_| BridgeError::ChainSwitch {
                chain_id,
                message: "Chain not added to wallet".to_string(),
            })?;

        provider
            .verify_chain_id()
            .await
            .map_err(|e| BridgeError::ChainSwitch {
                chain_id,
                message: e.to_string(),
            })?;

        *self.active_chain.write().await = Some(chain_id);
        debug!("Wallet switched to chain {}", chain_id);
        Ok(())
    }

    fn supports(&self, family: ChainFamily) -> bool {
        family == ChainFamily::Evm
    }

    async fn send_transaction(
        &self,
        chain_id: ChainId,
        tx: &StepTransaction,
    ) -> BridgeResult<String> {
        let signer = self.signer.clone().ok_or_else(|| {
            BridgeError::Wallet("No signing key configured for this wallet".to_string())
        })?;
        if self.active_chain().await != Some(chain_id) {
            self.switch_chain(chain_id).await?;
        }
        let provider = self.registry.get_provider(chain_id)?;
        let request = self.build_transaction(tx)?;

        let client = SignerMiddleware::new(provider.http().clone(), signer.with_chain_id(chain_id));
        let pending = client
            .send_transaction(request, None)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("insufficient funds") {
                    BridgeError::Transaction {
                        chain_id,
                        message: "Insufficient funds for transfer and gas".to_string(),
                    }
                } else {
                    BridgeError::Transaction { chain_id, message }
                }
            })?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        info!("Transaction sent on chain {}: {}", chain_id, tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_transaction(&self, chain_id: ChainId, tx_hash: &str) -> BridgeResult<()> {
        let provider = self.registry.get_provider(chain_id)?;
        let hash: H256 = tx_hash.parse().map_err(|e| BridgeError::Transaction {
            chain_id,
            message: format!("Invalid transaction hash {}: {}", tx_hash, e),
        })?;

        let receipt = PendingTransaction::new(hash, provider.http())
            .await
            .map_err(|e| BridgeError::Transaction {
                chain_id,
                message: e.to_string(),
            })?;

        match receipt {
            Some(receipt) if receipt.status == Some(1.into()) => Ok(()),
            Some(_) => Err(BridgeError::Transaction {
                chain_id,
                message: format!("Transaction {} reverted", tx_hash),
            }),
            None => Err(BridgeError::Transaction {
                chain_id,
                message: format!("Transaction {} was dropped", tx_hash),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SOLANA_CHAIN_ID;
    use crate::config::Settings;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn registry() -> Arc<ChainRegistry> {
        let settings = Settings::parse(crate::config::SAMPLE_CONFIG).unwrap();
        Arc::new(ChainRegistry::new(&settings).unwrap())
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::zero());
        assert_eq!(parse_quantity("0x").unwrap(), U256::zero());
        assert_eq!(parse_quantity("0x2a").unwrap(), U256::from(42));
        assert_eq!(parse_quantity("1000").unwrap(), U256::from(1000));
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_signing_key_defines_account() {
        std::env::set_var("PORTA_TEST_WALLET_KEY", DEV_KEY);
        let config = WalletConfig {
            private_key_env: Some("PORTA_TEST_WALLET_KEY".to_string()),
            address: None,
        };

        let wallet = RpcWallet::new(&config, registry()).unwrap();
        assert_eq!(wallet.current_account().await.as_deref(), Some(DEV_ADDRESS));
    }

    #[tokio::test]
    async fn test_watch_only_wallet_cannot_sign() {
        let config = WalletConfig {
            private_key_env: None,
            address: Some(DEV_ADDRESS.to_string()),
        };
        let wallet = RpcWallet::new(&config, registry()).unwrap();
        assert_eq!(wallet.current_account().await.as_deref(), Some(DEV_ADDRESS));

        let tx = StepTransaction {
            to: DEV_ADDRESS.to_string(),
            data: "0x".to_string(),
            value: Some("0x0".to_string()),
            gas_limit: None,
            gas_price: None,
            chain_id: Some(534352),
        };
        let err = wallet.send_transaction(534352, &tx).await.unwrap_err();
        assert!(matches!(err, BridgeError::Wallet(_)));
    }

    #[tokio::test]
    async fn test_switch_rejects_unsupported_chains() {
        let config = WalletConfig {
            private_key_env: None,
            address: None,
        };
        let wallet = RpcWallet::new(&config, registry()).unwrap();
        assert!(wallet.current_account().await.is_none());
        assert!(!wallet.supports(ChainFamily::Solana));

        let err = wallet.switch_chain(SOLANA_CHAIN_ID).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedChainFamily { .. }));

        let err = wallet.switch_chain(56).await.unwrap_err();
        assert!(matches!(err, BridgeError::ChainSwitch { chain_id: 56, .. }));
        assert!(wallet.active_chain().await.is_none());
    }
}
