//! Balance discovery for the active source chain
//!
//! Balances for a bounded token list are fetched concurrently and published as a
//! single snapshot once every fetch has settled. A failed fetch degrades to a
//! zero balance for that token only.

use crate::amount;
use crate::chain::{erc20, ChainFamily, ChainId, ChainRegistry};
use crate::error::{BridgeError, BridgeResult};
use crate::tokens::TokenDescriptor;

use async_trait::async_trait;
use ethers::types::Address;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Source of per-token account balances
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Human-readable balance of `token` held by `account`
    async fn get_balance(&self, token: &TokenDescriptor, account: &str) -> BridgeResult<String>;
}

/// Balance source reading directly from chain RPC
pub struct RpcBalanceSource {
    registry: Arc<ChainRegistry>,
}

impl RpcBalanceSource {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn get_balance(&self, token: &TokenDescriptor, account: &str) -> BridgeResult<String> {
        if !ChainFamily::Evm.is_valid_address(account) {
            return Err(BridgeError::Wallet(format!(
                "Account {} is not an EVM address",
                account
            )));
        }
        let provider = self.registry.get_provider(token.chain_id)?;

        if token.is_native() {
            let owner: Address = account
                .parse()
                .map_err(|e| BridgeError::Internal(format!("Invalid account {}: {}", account, e)))?;
            let wei = provider.get_native_balance(owner).await?;
            return amount::from_base_units(&wei.to_string(), token.decimals);
        }

        let contract: Address = token.address.parse().map_err(|e| {
            BridgeError::Internal(format!("Invalid token address {}: {}", token.address, e))
        })?;
        let calldata = erc20::balance_of_calldata(account)?;
        let output = provider.call(contract, calldata).await?;
        let value = erc20::decode_balance(&output)?;

        Ok(amount::format_base_units(value, token.decimals))
    }
}

/// Complete balance map for one (chain, account) context
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSnapshot {
    pub chain_id: ChainId,
    pub account: String,
    /// Token address to human-readable balance, one entry per checked token
    pub balances: BTreeMap<String, String>,
    /// Checked tokens holding a nonzero balance, in catalog order
    pub with_balance: Vec<TokenDescriptor>,
}

impl BalanceSnapshot {
    /// Balance of a token by address (case-insensitive)
    pub fn balance_of(&self, address: &str) -> Option<&str> {
        self.balances
            .iter()
            .find(|(token, _)| token.eq_ignore_ascii_case(address))
            .map(|(_, balance)| balance.as_str())
    }

    /// True when the token holds a nonzero balance
    pub fn has_balance(&self, address: &str) -> bool {
        self.balance_of(address).is_some_and(amount::is_positive)
    }

    /// Token to select instead of `selected` when it holds nothing
    pub fn reselect_for(&self, selected: &str) -> Option<&TokenDescriptor> {
        if self.has_balance(selected) {
            return None;
        }
        self.with_balance.first()
    }
}

/// Concurrent balance discovery over a bounded token list
pub struct BalanceDiscovery {
    source: Arc<dyn BalanceSource>,
    max_tokens: usize,
}

impl BalanceDiscovery {
    pub fn new(source: Arc<dyn BalanceSource>, max_tokens: usize) -> Self {
        Self { source, max_tokens }
    }

    /// Discovery is skipped on chains whose balances are validated at quote time
    pub fn skips(chain_id: ChainId) -> bool {
        ChainFamily::of(chain_id) == ChainFamily::Solana
    }

    /// The prefix of `tokens` that is balance-checked
    pub fn bounded<'a>(&self, tokens: &'a [TokenDescriptor]) -> &'a [TokenDescriptor] {
        &tokens[..tokens.len().min(self.max_tokens)]
    }

    /// Fetch every checked token's balance and build a snapshot
    pub async fn discover(
        &self,
        chain_id: ChainId,
        account: &str,
        tokens: &[TokenDescriptor],
    ) -> BalanceSnapshot {
        let started = Instant::now();
        let tokens = self.bounded(tokens);

        let fetches = tokens.iter().map(|token| async move {
            match self.source.get_balance(token, account).await {
                Ok(balance) => {
                    crate::metrics::record_balance_fetch(chain_id, true);
                    balance
                }
                Err(e) => {
                    warn!(
                        "Balance fetch failed for {} on chain {}: {}",
                        token.symbol, chain_id, e
                    );
                    crate::metrics::record_balance_fetch(chain_id, false);
                    "0".to_string()
                }
            }
        });
        let results = join_all(fetches).await;

        let mut balances = BTreeMap::new();
        let mut with_balance = Vec::new();
        for (token, balance) in tokens.iter().zip(results) {
            if amount::is_positive(&balance) {
                with_balance.push(token.clone());
            }
            balances.insert(token.address.clone(), balance);
        }

        let elapsed = started.elapsed().as_secs_f64();
        crate::metrics::record_balance_discovery(chain_id, elapsed);
        debug!(
            "Discovered {} balances on chain {} ({} nonzero) in {:.2}s",
            balances.len(),
            chain_id,
            with_balance.len(),
            elapsed
        );

        BalanceSnapshot {
            chain_id,
            account: account.to_string(),
            balances,
            with_balance,
        }
    }
}

/// Tokens offered for source selection: holders first, full list when nothing is held
pub fn selectable_tokens<'a>(
    tokens: &'a [TokenDescriptor],
    snapshot: Option<&'a BalanceSnapshot>,
) -> &'a [TokenDescriptor] {
    match snapshot {
        Some(snapshot) if !snapshot.with_balance.is_empty() => &snapshot.with_balance,
        _ => tokens,
    }
}
