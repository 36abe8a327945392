//! Transfer session: the orchestration core
//!
//! A `TransferSession` owns the transfer request and everything derived from it
//! (token lists, balances, the current quote). All mutation goes through the
//! setters below; external calls never hold the state lock, and results that
//! arrive after the selection moved on are discarded.

pub mod debounce;
pub mod selection;

pub use debounce::Debouncer;
pub use selection::{Effects, QuoteKey, TransferRequest};

use crate::amount;
use crate::balance::{BalanceDiscovery, BalanceSnapshot, BalanceSource};
use crate::chain::{ChainFamily, ChainId, WalletProvider};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::SessionEvent;
use crate::execution::{run_execution, ExecutionOutcome};
use crate::quote::{Quote, QuoteFailure, QuoteRequest, QuoteService};
use crate::resolver::{is_resolvable_name, NameResolver};
use crate::tokens::{find_token, TokenCatalog, TokenDescriptor};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// External collaborators a session coordinates
#[derive(Clone)]
pub struct Collaborators {
    pub wallet: Arc<dyn WalletProvider>,
    pub quotes: Arc<dyn QuoteService>,
    pub catalog: Arc<dyn TokenCatalog>,
    pub balances: Arc<dyn BalanceSource>,
    pub resolver: Arc<dyn NameResolver>,
}

/// Balance discovery state for the active source chain
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BalanceState {
    Idle,
    Loading,
    /// Not discovered on this chain; validated by the quote service instead
    Skipped,
    Ready(BalanceSnapshot),
}

/// A quote applied for the current selection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyQuote {
    pub generation: u64,
    #[serde(skip)]
    pub key: QuoteKey,
    pub dest_amount_formatted: String,
    #[serde(rename = "fromAmountUSD", skip_serializing_if = "Option::is_none")]
    pub from_amount_usd: Option<String>,
    #[serde(rename = "toAmountUSD", skip_serializing_if = "Option::is_none")]
    pub to_amount_usd: Option<String>,
    pub quote: Quote,
}

/// Quote scheduler state
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuoteState {
    Idle,
    Debouncing { generation: u64 },
    Fetching { generation: u64 },
    Ready(ReadyQuote),
    Error { generation: u64, failure: QuoteFailure },
}

/// Everything a session owns
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub request: TransferRequest,
    pub account: Option<String>,
    pub from_tokens: Vec<TokenDescriptor>,
    pub to_tokens: Vec<TokenDescriptor>,
    pub balances: BalanceState,
    pub quote: QuoteState,
    pub resolving_recipient: bool,
    pub executing: bool,
    pub last_execution: Option<ExecutionOutcome>,
}

impl SessionState {
    fn new(default_from_chain: ChainId) -> Self {
        Self {
            request: TransferRequest::new(default_from_chain),
            account: None,
            from_tokens: Vec::new(),
            to_tokens: Vec::new(),
            balances: BalanceState::Idle,
            quote: QuoteState::Idle,
            resolving_recipient: false,
            executing: false,
            last_execution: None,
        }
    }

    pub fn quote_key(&self) -> QuoteKey {
        self.request.quote_key(self.account.as_deref())
    }

    /// Selected source token descriptor
    pub fn from_token(&self) -> Option<&TokenDescriptor> {
        let address = self.request.from_token.as_deref()?;
        find_token(&self.from_tokens, address)
    }

    /// Balance of the selected source token, if discovered
    pub fn from_token_balance(&self) -> Option<&str> {
        let address = self.request.from_token.as_deref()?;
        match &self.balances {
            BalanceState::Ready(snapshot) => snapshot.balance_of(address),
            _ => None,
        }
    }
}

/// Result of committing the recipient field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Input is not a resolvable name; nothing to do
    NotApplicable,
    Resolved { address: String },
    NotFound,
    Failed { reason: String },
    /// Resolved, but the recipient was edited meanwhile
    Superseded,
}

/// Transfer orchestration session
pub struct TransferSession {
    config: BridgeConfig,
    wallet: Arc<dyn WalletProvider>,
    quotes: Arc<dyn QuoteService>,
    catalog: Arc<dyn TokenCatalog>,
    resolver: Arc<dyn NameResolver>,
    discovery: BalanceDiscovery,
    debouncer: Debouncer,
    balance_generation: AtomicU64,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl TransferSession {
    /// Create a session on the configured default source chain
    pub fn new(config: BridgeConfig, collaborators: Collaborators) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);

        Arc::new(Self {
            discovery: BalanceDiscovery::new(collaborators.balances, config.max_tokens),
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
            state: RwLock::new(SessionState::new(config.default_from_chain)),
            balance_generation: AtomicU64::new(0),
            wallet: collaborators.wallet,
            quotes: collaborators.quotes,
            catalog: collaborators.catalog,
            resolver: collaborators.resolver,
            config,
            events,
        })
    }

    /// Connect the account, switch to the default chain and load its tokens
    pub async fn start(self: &Arc<Self>) {
        let account = self.wallet.current_account().await;
        let chain = {
            let mut state = self.state.write().await;
            state.account = account.clone();
            state.request.from_chain
        };

        info!(
            "Session started on chain {:?} for account {:?}",
            chain, account
        );

        if let Some(chain) = chain {
            self.switch_chain(chain).await;
        }
        self.refresh_from_tokens().await;
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current state
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn set_from_chain(self: &Arc<Self>, chain_id: ChainId) {
        let effects = self.mutate(|s| s.request.set_from_chain(chain_id)).await;
        self.apply_effects(effects).await;
    }

    pub async fn set_to_chain(self: &Arc<Self>, chain_id: ChainId) {
        let effects = self.mutate(|s| s.request.set_to_chain(chain_id)).await;
        self.apply_effects(effects).await;
    }

    pub async fn swap_chains(self: &Arc<Self>) {
        let effects = self.mutate(|s| s.request.swap_chains()).await;
        self.apply_effects(effects).await;
    }

    /// Select a source token from the current source chain's list
    pub async fn set_from_token(self: &Arc<Self>, address: &str) -> BridgeResult<()> {
        self.mutate(|s| {
            let chain_id = s.request.from_chain.unwrap_or_default();
            let token = find_token(&s.from_tokens, address).ok_or_else(|| {
                BridgeError::UnknownToken {
                    chain_id,
                    address: address.to_string(),
                }
            })?;
            s.request.set_from_token(Some(token.address.clone()));
            Ok(())
        })
        .await
    }

    /// Select a destination token from the current destination chain's list
    pub async fn set_to_token(self: &Arc<Self>, address: &str) -> BridgeResult<()> {
        self.mutate(|s| {
            let chain_id = s.request.to_chain.unwrap_or_default();
            let token = find_token(&s.to_tokens, address).ok_or_else(|| {
                BridgeError::UnknownToken {
                    chain_id,
                    address: address.to_string(),
                }
            })?;
            s.request.set_to_token(Some(token.address.clone()));
            Ok(())
        })
        .await
    }

    /// Set the human-readable amount; empty input clears it
    pub async fn set_amount(self: &Arc<Self>, amount: &str) -> BridgeResult<()> {
        let amount = amount.trim();
        if !amount.is_empty() {
            amount::validate(amount)?;
        }
        self.mutate(|s| s.request.set_amount(amount)).await;
        Ok(())
    }

    /// Fill the amount with a percentage of the selected token's balance
    pub async fn set_percentage(self: &Arc<Self>, percentage: u8) -> BridgeResult<String> {
        self.mutate(|s| {
            let token = s
                .from_token()
                .ok_or_else(|| BridgeError::IncompleteRequest("source token".to_string()))?;
            let balance = s.from_token_balance().unwrap_or("0");
            let amount = amount::percentage_of(balance, percentage, token.decimals)?;
            s.request.set_amount(amount.clone());
            Ok(amount)
        })
        .await
    }

    pub async fn set_recipient(self: &Arc<Self>, recipient: &str) {
        self.mutate(|s| s.request.set_recipient(recipient.trim())).await;
    }

    /// Resolve the recipient if it is a name; one attempt per commit
    pub async fn commit_recipient(self: &Arc<Self>) -> ResolutionOutcome {
        let name = {
            let mut state = self.state.write().await;
            let name = state.request.recipient.clone();
            if !is_resolvable_name(&name) {
                return ResolutionOutcome::NotApplicable;
            }
            state.resolving_recipient = true;
            name
        };

        let result = self.resolver.resolve(&name).await;

        let outcome = match result {
            Ok(Some(address)) => {
                let applied = self
                    .mutate(|s| {
                        if s.request.recipient != name {
                            return false;
                        }
                        s.request.set_recipient(address.clone());
                        true
                    })
                    .await;

                if applied {
                    info!("Resolved {} to {}", name, address);
                    self.emit(SessionEvent::NameResolved {
                        name: name.clone(),
                        address: address.clone(),
                    });
                    ResolutionOutcome::Resolved { address }
                } else {
                    debug!("Recipient changed while resolving {}", name);
                    ResolutionOutcome::Superseded
                }
            }
            Ok(None) => {
                self.emit(SessionEvent::NameNotFound { name: name.clone() });
                ResolutionOutcome::NotFound
            }
            Err(e) => {
                warn!("Name resolution failed for {}: {}", name, e);
                self.emit(SessionEvent::NameResolutionFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                });
                ResolutionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.state.write().await.resolving_recipient = false;
        crate::metrics::record_name_resolution(match &outcome {
            ResolutionOutcome::Resolved { .. } => "resolved",
            ResolutionOutcome::NotFound => "not_found",
            ResolutionOutcome::Failed { .. } => "failed",
            _ => "superseded",
        });
        outcome
    }

    /// React to the wallet reporting a different account
    pub async fn on_account_changed(self: &Arc<Self>, account: Option<String>) {
        let changed = self
            .mutate(|s| {
                if s.account == account {
                    return false;
                }
                s.account = account.clone();
                s.balances = BalanceState::Idle;
                true
            })
            .await;

        if changed {
            info!("Account changed to {:?}", account);
            self.balance_generation.fetch_add(1, Ordering::SeqCst);
            self.refresh_balances().await;
        }
    }

    /// Re-read the wallet account and react if it changed
    pub async fn sync_account(self: &Arc<Self>) {
        let account = self.wallet.current_account().await;
        self.on_account_changed(account).await;
    }

    /// Poll the wallet for account changes until the session is dropped
    pub async fn watch_account(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.account_poll_interval_ms);
        let session = Arc::downgrade(&self);
        drop(self);

        loop {
            tokio::time::sleep(interval).await;
            let Some(session) = session.upgrade() else {
                break;
            };
            session.sync_account().await;
        }
    }

    /// Execute the ready quote for the current selection.
    ///
    /// Execution runs to completion even if the caller stops waiting.
    pub async fn execute(self: &Arc<Self>) -> BridgeResult<ExecutionOutcome> {
        let (route, from_chain, to_chain) = {
            let mut state = self.state.write().await;
            if state.executing {
                return Err(BridgeError::ExecutionInProgress);
            }

            let from_chain = state
                .request
                .from_chain
                .ok_or_else(|| BridgeError::IncompleteRequest("source chain".to_string()))?;
            let to_chain = state
                .request
                .to_chain
                .ok_or_else(|| BridgeError::IncompleteRequest("destination chain".to_string()))?;
            if !self.wallet.supports(ChainFamily::of(from_chain)) {
                return Err(BridgeError::UnsupportedChainFamily {
                    chain_id: from_chain,
                });
            }
            if state.account.is_none() {
                return Err(BridgeError::WalletNotConnected);
            }

            let key = state.quote_key();
            let route = match &state.quote {
                QuoteState::Ready(ready) if ready.key == key => self.quotes.to_route(&ready.quote),
                _ => return Err(BridgeError::QuoteUnavailable),
            };

            state.executing = true;
            (route, from_chain, to_chain)
        };

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome =
                run_execution(session.quotes.clone(), route, from_chain, to_chain).await;

            crate::metrics::record_execution(
                from_chain,
                to_chain,
                outcome.is_success(),
                started.elapsed().as_secs_f64(),
            );
            let result = outcome.result();
            info!(
                "Execution {} on {} -> {}: source tx {:?}, destination tx {:?}",
                if outcome.is_success() { "succeeded" } else { "failed" },
                from_chain,
                to_chain,
                result.source_tx_id,
                result.dest_tx_id
            );
            {
                let mut state = session.state.write().await;
                state.executing = false;
                state.last_execution = Some(outcome.clone());
            }
            session.emit(SessionEvent::ExecutionFinished {
                outcome: outcome.clone(),
            });
            outcome
        });

        handle
            .await
            .map_err(|e| BridgeError::Internal(format!("Execution task failed: {}", e)))
    }

    /// Apply a mutation under the state lock, re-arming the quote scheduler when
    /// the quote tuple changed
    async fn mutate<T>(self: &Arc<Self>, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.write().await;
        let before = state.quote_key();
        let out = f(&mut state);

        // Token lists are chain scoped; drop them with the chain they belong to
        if state.request.from_chain != before.from_chain {
            state.from_tokens.clear();
            state.balances = BalanceState::Idle;
            self.balance_generation.fetch_add(1, Ordering::SeqCst);
        }
        if state.request.to_chain != before.to_chain {
            state.to_tokens.clear();
        }

        let key_changed = state.quote_key() != before;
        let stalled = matches!(state.quote, QuoteState::Idle) && self.quote_request(&state).is_some();
        if key_changed || stalled {
            state.request.last_quoted_dest_amount = None;
            let generation = self.schedule_quote();
            state.quote = QuoteState::Debouncing { generation };
        }

        out
    }

    async fn apply_effects(self: &Arc<Self>, effects: Effects) {
        if let Some(chain) = effects.switch_chain {
            self.switch_chain(chain).await;
        }
        if effects.reload_from_tokens {
            self.refresh_from_tokens().await;
        }
        if effects.reload_to_tokens {
            self.refresh_to_tokens().await;
        }
    }

    async fn switch_chain(&self, chain_id: ChainId) {
        let result = if self.wallet.supports(ChainFamily::of(chain_id)) {
            self.wallet.switch_chain(chain_id).await
        } else {
            Err(BridgeError::UnsupportedChainFamily { chain_id })
        };

        crate::metrics::record_chain_switch(chain_id, result.is_ok());
        match result {
            Ok(()) => self.emit(SessionEvent::ChainSwitched { chain_id }),
            Err(e) => {
                warn!("Chain switch to {} failed: {}", chain_id, e);
                self.emit(SessionEvent::ChainSwitchFailed {
                    chain_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn load_tokens(&self, chain_id: ChainId) -> Vec<TokenDescriptor> {
        match self.catalog.list_tokens(chain_id).await {
            Ok(tokens) => tokens.into_iter().take(self.config.max_tokens).collect(),
            Err(e) => {
                warn!("Failed to load tokens for chain {}: {}", chain_id, e);
                Vec::new()
            }
        }
    }

    /// Load the source chain's tokens, select its native token and discover balances
    async fn refresh_from_tokens(self: &Arc<Self>) {
        let Some(chain_id) = self.state.read().await.request.from_chain else {
            return;
        };
        let tokens = self.load_tokens(chain_id).await;

        let applied = self
            .mutate(|s| {
                if s.request.from_chain != Some(chain_id) {
                    return false;
                }
                if s.request.from_token.is_none() {
                    let native = tokens.iter().find(|t| t.is_native());
                    s.request.set_from_token(native.map(|t| t.address.clone()));
                }
                s.from_tokens = tokens;
                true
            })
            .await;

        if applied {
            self.refresh_balances().await;
        }
    }

    /// Load the destination chain's tokens and select its native token
    async fn refresh_to_tokens(self: &Arc<Self>) {
        let Some(chain_id) = self.state.read().await.request.to_chain else {
            return;
        };
        let tokens = self.load_tokens(chain_id).await;

        self.mutate(|s| {
            if s.request.to_chain != Some(chain_id) {
                return;
            }
            if s.request.to_token.is_none() {
                let native = tokens.iter().find(|t| t.is_native());
                s.request.set_to_token(native.map(|t| t.address.clone()));
            }
            s.to_tokens = tokens;
        })
        .await;
    }

    /// Rebuild the balance map for the current (chain, account) and publish it whole
    async fn refresh_balances(self: &Arc<Self>) {
        let (chain_id, account, tokens, generation) = {
            let mut state = self.state.write().await;
            let Some(chain_id) = state.request.from_chain else {
                return;
            };
            if BalanceDiscovery::skips(chain_id) {
                state.balances = BalanceState::Skipped;
                return;
            }
            let Some(account) = state.account.clone() else {
                state.balances = BalanceState::Idle;
                return;
            };
            if state.from_tokens.is_empty() {
                return;
            }

            let generation = self.balance_generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.balances = BalanceState::Loading;
            (chain_id, account, state.from_tokens.clone(), generation)
        };

        let snapshot = self.discovery.discover(chain_id, &account, &tokens).await;

        let published = self
            .mutate(|s| {
                let current = self.balance_generation.load(Ordering::SeqCst) == generation
                    && s.request.from_chain == Some(chain_id)
                    && s.account.as_deref() == Some(account.as_str());
                if !current {
                    return None;
                }

                if let Some(selected) = s.request.from_token.clone() {
                    if let Some(replacement) = snapshot.reselect_for(&selected) {
                        debug!(
                            "Selected token holds no balance, switching to {}",
                            replacement.symbol
                        );
                        s.request.set_from_token(Some(replacement.address.clone()));
                    }
                }

                let with_balance = snapshot.with_balance.len();
                s.balances = BalanceState::Ready(snapshot);
                Some(with_balance)
            })
            .await;

        match published {
            Some(with_balance) => self.emit(SessionEvent::BalancesUpdated {
                chain_id,
                with_balance,
            }),
            None => debug!("Discarded stale balances for chain {}", chain_id),
        }
    }

    /// Quote request for the state, or `None` while input is incomplete
    fn quote_request(&self, state: &SessionState) -> Option<QuoteRequest> {
        let request = &state.request;
        let from_chain = request.from_chain?;
        let to_chain = request.to_chain?;
        let from_token = state.from_token()?;
        let to_token = request.to_token.clone()?;
        let account = state.account.clone()?;

        let recipient = request.recipient.trim();
        if recipient.is_empty() || is_resolvable_name(recipient) {
            return None;
        }
        if !amount::is_positive(&request.amount) {
            return None;
        }
        let from_amount = amount::to_base_units(&request.amount, from_token.decimals).ok()?;
        if from_amount == "0" {
            return None;
        }

        Some(QuoteRequest {
            from_chain,
            to_chain,
            from_token: from_token.address.clone(),
            to_token,
            from_amount,
            from_address: account,
            to_address: recipient.to_string(),
            slippage: self.config.slippage,
            order: self.config.order,
        })
    }

    /// Arm the debounce timer for the current tuple
    fn schedule_quote(self: &Arc<Self>) -> u64 {
        let session = Arc::downgrade(self);
        self.debouncer.arm(move |generation| async move {
            if let Some(session) = session.upgrade() {
                session.fetch_quote(generation).await;
            }
        })
    }

    /// Fetch the quote for a settled tuple and apply it if still current
    async fn fetch_quote(self: Arc<Self>, generation: u64) {
        let (request, key) = {
            let mut state = self.state.write().await;
            if !self.debouncer.is_current(generation) {
                return;
            }
            let Some(request) = self.quote_request(&state) else {
                state.quote = QuoteState::Idle;
                return;
            };
            state.quote = QuoteState::Fetching { generation };
            state.request.last_quoted_dest_amount = None;
            (request, state.quote_key())
        };

        debug!(
            "Requesting quote #{}: {} {} on {} -> {} on {}",
            generation,
            request.from_amount,
            request.from_token,
            request.from_chain,
            request.to_token,
            request.to_chain
        );
        crate::metrics::record_quote_request(request.from_chain, request.to_chain);
        let started = Instant::now();
        let result = self.quotes.get_quote(&request).await;
        let latency = started.elapsed().as_secs_f64();

        let mut state = self.state.write().await;
        if !self.debouncer.is_current(generation) || state.quote_key() != key {
            debug!("Discarding quote #{} for a superseded selection", generation);
            crate::metrics::record_quote_discarded();
            return;
        }

        let ready = result.and_then(|quote| {
            let formatted = quote.dest_amount_formatted(self.config.display_decimals)?;
            Ok(ReadyQuote {
                generation,
                key,
                dest_amount_formatted: formatted,
                from_amount_usd: quote.from_amount_usd.clone(),
                to_amount_usd: quote.to_amount_usd.clone(),
                quote,
            })
        });

        let event = match ready {
            Ok(ready) => {
                let dest_amount_formatted = ready.dest_amount_formatted.clone();
                state.request.last_quoted_dest_amount = Some(dest_amount_formatted.clone());
                state.quote = QuoteState::Ready(ready);
                crate::metrics::record_quote_outcome("ready", latency);
                SessionEvent::QuoteReady {
                    generation,
                    dest_amount_formatted,
                }
            }
            Err(e) => {
                let failure = QuoteFailure::classify(&e);
                warn!(
                    "Quote #{} failed: {} ({})",
                    generation,
                    failure.kind.user_message(),
                    e
                );
                state.request.last_quoted_dest_amount = None;
                state.quote = QuoteState::Error {
                    generation,
                    failure: failure.clone(),
                };
                crate::metrics::record_quote_outcome(failure.kind.as_str(), latency);
                SessionEvent::QuoteFailed {
                    generation,
                    failure,
                }
            }
        };
        drop(state);

        self.emit(event);
    }

    fn emit(&self, event: SessionEvent) {
        crate::metrics::record_event(&event);
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::MockBalanceSource;
    use crate::chain::wallet::MockWalletProvider;
    use crate::chain::{EVM_NATIVE_ADDRESS, SOLANA_CHAIN_ID};
    use crate::quote::fixtures::quote;
    use crate::quote::{ProgressSender, QuoteFailureKind, Route};
    use crate::resolver::MockNameResolver;
    use crate::tokens::fixtures::{native, token};

    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::{oneshot, watch};

    const ACCOUNT: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";
    const RECIPIENT: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";
    const USDC: &str = "0x0000000000000000000000000000000000000001";
    const OTHER_ACCOUNT: &str = "0x0000000000000000000000000000000000000abc";

    /// Records requests; the first call can be held until released
    #[derive(Default)]
    struct FakeQuotes {
        requests: Mutex<Vec<QuoteRequest>>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        failure: Mutex<Option<String>>,
    }

    impl FakeQuotes {
        fn requests(&self) -> Vec<QuoteRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn hold_next(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.gate.lock().unwrap() = Some(rx);
            tx
        }

        fn fail_with(&self, message: &str) {
            *self.failure.lock().unwrap() = Some(message.to_string());
        }
    }

    #[async_trait]
    impl QuoteService for FakeQuotes {
        async fn get_quote(&self, request: &QuoteRequest) -> BridgeResult<Quote> {
            self.requests.lock().unwrap().push(request.clone());
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            if let Some(message) = self.failure.lock().unwrap().clone() {
                return Err(BridgeError::QuoteRejected {
                    status: 404,
                    code: None,
                    message,
                });
            }
            // Destination amount is twice the source amount
            let dest = (request.from_amount.parse::<u128>().unwrap() * 2).to_string();
            Ok(quote(request.from_chain, request.to_chain, &request.from_amount, &dest))
        }

        async fn execute_route(&self, route: Route, _progress: ProgressSender) -> BridgeResult<Route> {
            Ok(route)
        }
    }

    struct StaticCatalog {
        tokens: HashMap<ChainId, Vec<TokenDescriptor>>,
    }

    #[async_trait]
    impl TokenCatalog for StaticCatalog {
        async fn list_tokens(&self, chain_id: ChainId) -> BridgeResult<Vec<TokenDescriptor>> {
            Ok(self.tokens.get(&chain_id).cloned().unwrap_or_default())
        }
    }

    /// Token lists for `held_chain` wait until the gate opens
    struct GatedCatalog {
        inner: StaticCatalog,
        held_chain: ChainId,
        gate: watch::Receiver<bool>,
    }

    #[async_trait]
    impl TokenCatalog for GatedCatalog {
        async fn list_tokens(&self, chain_id: ChainId) -> BridgeResult<Vec<TokenDescriptor>> {
            if chain_id == self.held_chain {
                let mut gate = self.gate.clone();
                let _ = gate.wait_for(|open| *open).await;
            }
            self.inner.list_tokens(chain_id).await
        }
    }

    /// Balances on `held_chain` wait until the gate opens
    struct GatedBalances {
        held_chain: ChainId,
        gate: watch::Receiver<bool>,
    }

    #[async_trait]
    impl BalanceSource for GatedBalances {
        async fn get_balance(&self, token: &TokenDescriptor, _account: &str) -> BridgeResult<String> {
            if token.chain_id == self.held_chain {
                let mut gate = self.gate.clone();
                let _ = gate.wait_for(|open| *open).await;
            }
            let balance = if token.is_native() { "2" } else { "0" };
            Ok(balance.to_string())
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            default_from_chain: 1,
            debounce_ms: 500,
            max_tokens: 50,
            display_decimals: 6,
            slippage: 0.005,
            order: Default::default(),
            status_poll_interval_ms: 5_000,
            account_poll_interval_ms: 2_000,
        }
    }

    fn wallet() -> MockWalletProvider {
        wallet_with(|| Some(ACCOUNT.to_string()))
    }

    fn wallet_with(account: impl FnMut() -> Option<String> + Send + 'static) -> MockWalletProvider {
        let mut wallet = MockWalletProvider::new();
        wallet.expect_current_account().returning(account);
        wallet
            .expect_supports()
            .returning(|family| family == ChainFamily::Evm);
        wallet.expect_switch_chain().returning(|_| Ok(()));
        wallet
    }

    fn balances() -> MockBalanceSource {
        let mut balances = MockBalanceSource::new();
        balances.expect_get_balance().returning(|token, _| {
            let balance = if token.is_native() { "2" } else { "0" };
            Ok(balance.to_string())
        });
        balances
    }

    fn catalog() -> StaticCatalog {
        let mut tokens = HashMap::new();
        tokens.insert(1, vec![native(1, "ETH"), token(1, USDC, "USDC", 6)]);
        tokens.insert(56, vec![native(56, "BNB")]);
        tokens.insert(SOLANA_CHAIN_ID, vec![native(SOLANA_CHAIN_ID, "SOL")]);
        StaticCatalog { tokens }
    }

    fn session_with(
        quotes: Arc<FakeQuotes>,
        resolver: MockNameResolver,
    ) -> Arc<TransferSession> {
        TransferSession::new(
            config(),
            Collaborators {
                wallet: Arc::new(wallet()),
                quotes,
                catalog: Arc::new(catalog()),
                balances: Arc::new(balances()),
                resolver: Arc::new(resolver),
            },
        )
    }

    fn session_from(
        wallet: MockWalletProvider,
        catalog: Arc<dyn TokenCatalog>,
        balances: Arc<dyn BalanceSource>,
    ) -> Arc<TransferSession> {
        TransferSession::new(
            config(),
            Collaborators {
                wallet: Arc::new(wallet),
                quotes: Arc::new(FakeQuotes::default()),
                catalog,
                balances,
                resolver: Arc::new(MockNameResolver::new()),
            },
        )
    }

    /// Wallet that reports `ACCOUNT` once, then `OTHER_ACCOUNT`
    fn switching_wallet() -> MockWalletProvider {
        let calls = AtomicUsize::new(0);
        wallet_with(move || {
            let account = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ACCOUNT
            } else {
                OTHER_ACCOUNT
            };
            Some(account.to_string())
        })
    }

    fn balance_updates(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<ChainId> {
        let mut chains = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::BalancesUpdated { chain_id, .. } = event {
                chains.push(chain_id);
            }
        }
        chains
    }

    /// Session on chain 1 -> 56 with native tokens selected
    async fn ready_session(quotes: Arc<FakeQuotes>) -> Arc<TransferSession> {
        let session = session_with(quotes, MockNameResolver::new());
        session.start().await;
        session.set_to_chain(56).await;
        session
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_tuple_issues_one_quote() {
        let quotes = Arc::new(FakeQuotes::default());
        let session = ready_session(quotes.clone()).await;

        session.set_amount("1.5").await.unwrap();
        session.set_recipient(RECIPIENT).await;
        assert!(quotes.requests().is_empty());
        settle().await;

        let requests = quotes.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.from_chain, 1);
        assert_eq!(request.to_chain, 56);
        assert_eq!(request.from_token, EVM_NATIVE_ADDRESS);
        assert_eq!(request.to_token, EVM_NATIVE_ADDRESS);
        assert_eq!(request.from_amount, "1500000000000000000");
        assert_eq!(request.from_address, ACCOUNT);
        assert_eq!(request.to_address, RECIPIENT);

        let state = session.snapshot().await;
        assert!(matches!(state.quote, QuoteState::Ready(_)));
        assert_eq!(state.request.last_quoted_dest_amount.as_deref(), Some("3.000000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_quote_only_last_tuple() {
        let quotes = Arc::new(FakeQuotes::default());
        let session = ready_session(quotes.clone()).await;
        session.set_recipient(RECIPIENT).await;

        for amount in ["1", "1.2", "1.25", "1.5"] {
            session.set_amount(amount).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(quotes.requests().is_empty());
        settle().await;

        let requests = quotes.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].from_amount, "1500000000000000000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_discarded_after_edit() {
        let quotes = Arc::new(FakeQuotes::default());
        let session = ready_session(quotes.clone()).await;
        session.set_recipient(RECIPIENT).await;

        let release = quotes.hold_next();
        session.set_amount("1").await.unwrap();
        settle().await;
        assert!(matches!(session.snapshot().await.quote, QuoteState::Fetching { .. }));

        session.set_amount("2").await.unwrap();
        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = session.snapshot().await;
        assert!(matches!(state.quote, QuoteState::Debouncing { .. }));
        assert!(state.request.last_quoted_dest_amount.is_none());

        settle().await;
        let state = session.snapshot().await;
        match state.quote {
            QuoteState::Ready(ready) => {
                assert_eq!(ready.quote.source_amount, "2000000000000000000")
            }
            other => panic!("unexpected quote state {:?}", other),
        }
        assert_eq!(quotes.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_input_issues_no_request() {
        let quotes = Arc::new(FakeQuotes::default());
        let session = ready_session(quotes.clone()).await;

        session.set_amount("1.5").await.unwrap();
        settle().await;
        session.set_recipient("alice.eth").await;
        settle().await;
        session.set_recipient(RECIPIENT).await;
        session.set_amount("0").await.unwrap();
        settle().await;

        assert!(quotes.requests().is_empty());
        assert!(matches!(session.snapshot().await.quote, QuoteState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_route_is_classified() {
        let quotes = Arc::new(FakeQuotes::default());
        quotes.fail_with("Unavailable route: no bridge connects these chains");
        let session = ready_session(quotes.clone()).await;
        let mut events = session.subscribe();

        session.set_amount("1.5").await.unwrap();
        session.set_recipient(RECIPIENT).await;
        settle().await;

        let state = session.snapshot().await;
        match &state.quote {
            QuoteState::Error { failure, .. } => {
                assert_eq!(failure.kind, QuoteFailureKind::NoRouteAvailable)
            }
            other => panic!("unexpected quote state {:?}", other),
        }
        assert!(state.request.last_quoted_dest_amount.is_none());
        assert_eq!(state.request.from_chain, Some(1));
        assert_eq!(state.request.to_chain, Some(56));
        assert_eq!(state.request.from_token.as_deref(), Some(EVM_NATIVE_ADDRESS));
        assert_eq!(state.request.to_token.as_deref(), Some(EVM_NATIVE_ADDRESS));

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::QuoteFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_resolution_overwrites_recipient_once() {
        let mut resolver = MockNameResolver::new();
        resolver
            .expect_resolve()
            .withf(|name| name == "alice.eth")
            .times(1)
            .returning(|_| Ok(Some(RECIPIENT.to_string())));

        let session = session_with(Arc::new(FakeQuotes::default()), resolver);
        session.start().await;
        let mut events = session.subscribe();

        session.set_recipient("alice.eth").await;
        let outcome = session.commit_recipient().await;
        assert_eq!(
            outcome,
            ResolutionOutcome::Resolved {
                address: RECIPIENT.to_string()
            }
        );

        let state = session.snapshot().await;
        assert_eq!(state.request.recipient, RECIPIENT);
        assert!(!state.resolving_recipient);

        let mut resolved = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::NameResolved { .. }) {
                resolved += 1;
            }
        }
        assert_eq!(resolved, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_name_leaves_recipient() {
        let mut resolver = MockNameResolver::new();
        resolver.expect_resolve().returning(|_| Ok(None));

        let session = session_with(Arc::new(FakeQuotes::default()), resolver);
        session.set_recipient("nobody.eth").await;

        assert_eq!(session.commit_recipient().await, ResolutionOutcome::NotFound);
        assert_eq!(session.snapshot().await.request.recipient, "nobody.eth");

        session.set_recipient(RECIPIENT).await;
        assert_eq!(
            session.commit_recipient().await,
            ResolutionOutcome::NotApplicable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_chain_change_replaces_tokens_and_balances() {
        let session = ready_session(Arc::new(FakeQuotes::default())).await;
        session.set_amount("1").await.unwrap();

        let state = session.snapshot().await;
        match &state.balances {
            BalanceState::Ready(snapshot) => assert_eq!(snapshot.chain_id, 1),
            other => panic!("unexpected balance state {:?}", other),
        }

        session.set_from_chain(56).await;
        let state = session.snapshot().await;
        assert_eq!(state.request.from_chain, Some(56));
        assert!(state.request.amount.is_empty());
        assert!(state.from_tokens.iter().all(|t| t.chain_id == 56));
        match &state.balances {
            BalanceState::Ready(snapshot) => {
                assert_eq!(snapshot.chain_id, 56);
                assert_eq!(snapshot.balances.len(), 1);
            }
            other => panic!("unexpected balance state {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_balance_selection_is_replaced() {
        let session = ready_session(Arc::new(FakeQuotes::default())).await;
        session.set_from_token(USDC).await.unwrap();
        assert_eq!(
            session.snapshot().await.request.from_token.as_deref(),
            Some(USDC)
        );

        // Re-discovery for a new account moves the selection to a held token
        session
            .on_account_changed(Some(OTHER_ACCOUNT.to_string()))
            .await;
        assert_eq!(
            session.snapshot().await.request.from_token.as_deref(),
            Some(EVM_NATIVE_ADDRESS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_evm_source_skips_discovery() {
        let session = ready_session(Arc::new(FakeQuotes::default())).await;
        let mut events = session.subscribe();

        session.set_from_chain(SOLANA_CHAIN_ID).await;
        let state = session.snapshot().await;
        assert!(matches!(state.balances, BalanceState::Skipped));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::ChainSwitchFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentage_of_selected_balance() {
        let session = ready_session(Arc::new(FakeQuotes::default())).await;

        assert_eq!(session.set_percentage(50).await.unwrap(), "1");
        assert_eq!(session.snapshot().await.request.amount, "1");
        assert!(session.set_percentage(150).await.is_err());
        assert!(session.set_amount("abc").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_requires_ready_quote() {
        let quotes = Arc::new(FakeQuotes::default());
        let session = ready_session(quotes.clone()).await;

        let err = session.execute().await.unwrap_err();
        assert!(matches!(err, BridgeError::QuoteUnavailable));

        session.set_amount("1.5").await.unwrap();
        session.set_recipient(RECIPIENT).await;
        settle().await;

        let outcome = session.execute().await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.result().source_chain_id, 1);
        assert_eq!(outcome.result().dest_chain_id, 56);

        let state = session.snapshot().await;
        assert!(!state.executing);
        assert_eq!(state.last_execution, Some(outcome));
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_chains_moves_selection() {
        let session = ready_session(Arc::new(FakeQuotes::default())).await;
        session.swap_chains().await;

        let state = session.snapshot().await;
        assert_eq!(state.request.from_chain, Some(56));
        assert_eq!(state.request.to_chain, Some(1));
        assert!(state.from_tokens.iter().all(|t| t.chain_id == 56));
        assert!(state.to_tokens.iter().all(|t| t.chain_id == 1));
        assert_eq!(state.request.from_token.as_deref(), Some(EVM_NATIVE_ADDRESS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_balances_are_never_published() {
        let (release, gate) = watch::channel(false);
        let session = session_from(
            wallet(),
            Arc::new(catalog()),
            Arc::new(GatedBalances { held_chain: 1, gate }),
        );
        let mut events = session.subscribe();

        let first_discovery = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(session.snapshot().await.balances, BalanceState::Loading));

        // Chain 1 balances arrive only after the source moved to 56
        session.set_from_chain(56).await;
        release.send(true).unwrap();
        first_discovery.await.unwrap();

        match &session.snapshot().await.balances {
            BalanceState::Ready(snapshot) => assert_eq!(snapshot.chain_id, 56),
            other => panic!("unexpected balance state {:?}", other),
        }
        assert_eq!(balance_updates(&mut events), vec![56]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_token_list_is_discarded() {
        let (release, gate) = watch::channel(false);
        let mut inner = catalog();
        inner.tokens.insert(10, vec![native(10, "ETH")]);
        let session = session_from(
            wallet(),
            Arc::new(GatedCatalog {
                inner,
                held_chain: 56,
                gate,
            }),
            Arc::new(balances()),
        );
        session.start().await;

        let first_load = tokio::spawn({
            let session = session.clone();
            async move { session.set_to_chain(56).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.snapshot().await.request.to_chain, Some(56));

        session.set_to_chain(10).await;
        release.send(true).unwrap();
        first_load.await.unwrap();

        let state = session.snapshot().await;
        assert_eq!(state.request.to_chain, Some(10));
        let listed: Vec<_> = state
            .to_tokens
            .iter()
            .map(|t| (t.chain_id, t.symbol.as_str()))
            .collect();
        assert_eq!(listed, vec![(10, "ETH")]);
        assert_eq!(state.request.to_token.as_deref(), Some(EVM_NATIVE_ADDRESS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_account_follows_wallet() {
        let session = session_from(switching_wallet(), Arc::new(catalog()), Arc::new(balances()));
        session.start().await;
        assert_eq!(session.snapshot().await.account.as_deref(), Some(ACCOUNT));
        let mut events = session.subscribe();

        session.sync_account().await;

        let state = session.snapshot().await;
        assert_eq!(state.account.as_deref(), Some(OTHER_ACCOUNT));
        assert!(matches!(state.balances, BalanceState::Ready(_)));
        assert_eq!(balance_updates(&mut events), vec![1]);

        // Same account again changes nothing
        session.sync_account().await;
        assert!(balance_updates(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_watch_polls_until_session_dropped() {
        let session = session_from(switching_wallet(), Arc::new(catalog()), Arc::new(balances()));
        session.start().await;

        let watcher = tokio::spawn(session.clone().watch_account());
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(
            session.snapshot().await.account.as_deref(),
            Some(OTHER_ACCOUNT)
        );

        drop(session);
        let finished = tokio::time::timeout(Duration::from_secs(5), watcher).await;
        assert!(finished.is_ok());
    }
}
