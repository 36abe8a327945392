//! LI.FI REST client: quotes, token lists and route execution

use super::{
    Process, ProcessStatus, ProcessType, ProgressSender, Quote, QuoteRequest, QuoteService, Route,
    Step, StepExecution, StepTransaction,
};
use crate::chain::{erc20, ChainId, WalletProvider};
use crate::config::LifiConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::execution::ExecutionEvent;
use crate::tokens::{TokenCatalog, TokenDescriptor};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    tokens: HashMap<String, Vec<TokenDescriptor>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TransferStatus {
    NotFound,
    Invalid,
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInfo {
    tx_hash: Option<String>,
    chain_id: Option<ChainId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: TransferStatus,
    substatus: Option<String>,
    substatus_message: Option<String>,
    receiving: Option<TransactionInfo>,
}

/// Build the error for a non-success response
fn rejection(status: StatusCode, body: &str) -> BridgeError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code);
    let message = parsed
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            }
        });

    BridgeError::QuoteRejected {
        status: status.as_u16(),
        code,
        message,
    }
}

async fn check(response: Response) -> BridgeResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(rejection(status, &body))
}

fn emit(progress: &ProgressSender, step_index: usize, execution: &StepExecution) {
    // Progress is advisory; a dropped receiver does not stop execution
    let _ = progress.send(ExecutionEvent::StepUpdated {
        step_index,
        execution: execution.clone(),
    });
}

fn current_process(execution: &mut StepExecution) -> BridgeResult<&mut Process> {
    execution
        .process
        .last_mut()
        .ok_or_else(|| BridgeError::Internal("step has no active process".to_string()))
}

/// Client for the LI.FI routing API
pub struct LifiClient {
    client: reqwest::Client,
    api_url: String,
    integrator: String,
    wallet: Arc<dyn WalletProvider>,
    poll_interval: Duration,
    token_cache: DashMap<ChainId, Vec<TokenDescriptor>>,
}

impl LifiClient {
    pub fn new(
        config: &LifiConfig,
        poll_interval: Duration,
        wallet: Arc<dyn WalletProvider>,
    ) -> BridgeResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|e| BridgeError::Config(format!("Invalid LI.FI API key: {}", e)))?;
            headers.insert("x-lifi-api-key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            integrator: config.integrator.clone(),
            wallet,
            poll_interval,
            token_cache: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    /// Populate a step's transaction request
    async fn step_transaction(&self, step: &Step) -> BridgeResult<StepTransaction> {
        let response = self
            .client
            .post(self.url("advanced/stepTransaction"))
            .json(step)
            .send()
            .await?;
        let populated: Step = check(response).await?.json().await?;

        populated.transaction_request.ok_or_else(|| {
            BridgeError::Execution(format!("No transaction returned for step {}", step.id))
        })
    }

    async fn transfer_status(&self, tx_hash: &str, step: &Step) -> BridgeResult<StatusResponse> {
        let query = [
            ("txHash", tx_hash.to_string()),
            ("fromChain", step.action.from_chain_id.to_string()),
            ("toChain", step.action.to_chain_id.to_string()),
            ("bridge", step.tool.clone()),
        ];
        let response = self
            .client
            .get(self.url("status"))
            .query(&query)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Approve the routing contract to spend the source token
    async fn approve(
        &self,
        step: &Step,
        spender: &str,
        index: usize,
        execution: &mut StepExecution,
        progress: &ProgressSender,
    ) -> BridgeResult<()> {
        let chain_id = step.action.from_chain_id;
        execution
            .process
            .push(Process::new(ProcessType::TokenAllowance, chain_id));
        emit(progress, index, execution);

        let calldata = erc20::approve_calldata(spender, &step.action.from_amount)?;
        let tx = StepTransaction {
            to: step.action.from_token.address.clone(),
            data: format!("0x{}", hex::encode(calldata)),
            value: None,
            gas_limit: None,
            gas_price: None,
            chain_id: Some(chain_id),
        };
        let tx_hash = self.wallet.send_transaction(chain_id, &tx).await?;

        let process = current_process(execution)?;
        process.tx_hash = Some(tx_hash.clone());
        process.status = ProcessStatus::Pending;
        emit(progress, index, execution);

        self.wallet.wait_for_transaction(chain_id, &tx_hash).await?;
        current_process(execution)?.status = ProcessStatus::Done;
        emit(progress, index, execution);

        Ok(())
    }

    /// Poll the transfer status until the receiving transaction settles
    async fn await_receiving(
        &self,
        step: &Step,
        source_hash: &str,
        index: usize,
        execution: &mut StepExecution,
        progress: &ProgressSender,
    ) -> BridgeResult<()> {
        let mut receiving = Process::new(ProcessType::ReceivingChain, step.action.to_chain_id);
        receiving.status = ProcessStatus::Pending;
        execution.process.push(receiving);
        emit(progress, index, execution);

        loop {
            let status = match self.transfer_status(source_hash, step).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    warn!("Status check for {} failed, retrying: {}", source_hash, e);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status.status {
                TransferStatus::Done => {
                    let process = current_process(execution)?;
                    if let Some(info) = status.receiving {
                        process.tx_hash = info.tx_hash;
                        if info.chain_id.is_some() {
                            process.chain_id = info.chain_id;
                        }
                    }
                    process.message = status.substatus;
                    process.status = ProcessStatus::Done;
                    emit(progress, index, execution);
                    return Ok(());
                }
                TransferStatus::Failed => {
                    return Err(BridgeError::Execution(
                        status
                            .substatus_message
                            .unwrap_or_else(|| "Transfer failed on the destination chain".to_string()),
                    ));
                }
                TransferStatus::Invalid => {
                    return Err(BridgeError::Execution(format!(
                        "Transfer {} is not a valid bridge transaction",
                        source_hash
                    )));
                }
                TransferStatus::NotFound | TransferStatus::Pending => {
                    debug!("Transfer {} pending", source_hash);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        index: usize,
        execution: &mut StepExecution,
        progress: &ProgressSender,
    ) -> BridgeResult<()> {
        let from_chain = step.action.from_chain_id;
        let to_chain = step.action.to_chain_id;

        if !step.action.from_token.is_native() {
            if let Some(spender) = step.estimate.approval_address.as_deref() {
                self.approve(step, spender, index, execution, progress).await?;
            }
        }

        let process_type = if from_chain == to_chain {
            ProcessType::Swap
        } else {
            ProcessType::CrossChain
        };
        execution.process.push(Process::new(process_type, from_chain));
        emit(progress, index, execution);

        let tx = match step.transaction_request.clone() {
            Some(tx) => tx,
            None => self.step_transaction(step).await?,
        };
        let tx_hash = self.wallet.send_transaction(from_chain, &tx).await?;

        let process = current_process(execution)?;
        process.tx_hash = Some(tx_hash.clone());
        process.status = ProcessStatus::Pending;
        emit(progress, index, execution);

        self.wallet.wait_for_transaction(from_chain, &tx_hash).await?;
        current_process(execution)?.status = ProcessStatus::Done;
        emit(progress, index, execution);

        if from_chain != to_chain {
            self.await_receiving(step, &tx_hash, index, execution, progress)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl QuoteService for LifiClient {
    async fn get_quote(&self, request: &QuoteRequest) -> BridgeResult<Quote> {
        let query = [
            ("fromChain", request.from_chain.to_string()),
            ("toChain", request.to_chain.to_string()),
            ("fromToken", request.from_token.clone()),
            ("toToken", request.to_token.clone()),
            ("fromAmount", request.from_amount.clone()),
            ("fromAddress", request.from_address.clone()),
            ("toAddress", request.to_address.clone()),
            ("slippage", request.slippage.to_string()),
            ("order", request.order.as_str().to_string()),
            ("integrator", self.integrator.clone()),
        ];

        let response = self
            .client
            .get(self.url("quote"))
            .query(&query)
            .send()
            .await?;
        let step: Step = check(response).await?.json().await?;

        debug!(
            "Quote {} via {}: {} -> {}",
            step.id, step.tool, step.action.from_amount, step.estimate.to_amount
        );
        Ok(Quote::from_step(step))
    }

    async fn execute_route(&self, mut route: Route, progress: ProgressSender) -> BridgeResult<Route> {
        info!(
            "Executing route {} ({} steps) from chain {} to chain {}",
            route.id,
            route.steps.len(),
            route.from_chain_id,
            route.to_chain_id
        );

        for (index, step) in route.steps.iter_mut().enumerate() {
            let mut execution = StepExecution::default();
            emit(&progress, index, &execution);

            let outcome = self.run_step(step, index, &mut execution, &progress).await;
            match outcome {
                Ok(()) => {
                    execution.status = ProcessStatus::Done;
                    emit(&progress, index, &execution);
                    step.execution = Some(execution);
                }
                Err(e) => {
                    if let Some(process) = execution.process.last_mut() {
                        process.status = ProcessStatus::Failed;
                        process.message = Some(e.to_string());
                    }
                    execution.status = ProcessStatus::Failed;
                    emit(&progress, index, &execution);
                    step.execution = Some(execution);
                    return Err(e);
                }
            }
        }

        Ok(route)
    }
}

#[async_trait]
impl TokenCatalog for LifiClient {
    async fn list_tokens(&self, chain_id: ChainId) -> BridgeResult<Vec<TokenDescriptor>> {
        if let Some(tokens) = self.token_cache.get(&chain_id) {
            return Ok(tokens.clone());
        }

        let response = self
            .client
            .get(self.url("tokens"))
            .query(&[("chains", chain_id.to_string())])
            .send()
            .await?;
        let mut body: TokensResponse = check(response).await?.json().await?;
        let tokens = body.tokens.remove(&chain_id.to_string()).unwrap_or_default();

        debug!("Loaded {} tokens for chain {}", tokens.len(), chain_id);
        self.token_cache.insert(chain_id, tokens.clone());
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{QuoteFailure, QuoteFailureKind};

    const QUOTE_JSON: &str = r#"{
        "type": "lifi",
        "id": "0x4f3c2e6f1d6b5b9a",
        "tool": "stargateV2",
        "toolDetails": {"key": "stargateV2", "name": "StargateV2 (Fast mode)"},
        "action": {
            "fromToken": {"address": "0x0000000000000000000000000000000000000000", "chainId": 1, "symbol": "ETH", "decimals": 18, "name": "ETH", "priceUSD": "2500.12"},
            "fromAmount": "1500000000000000000",
            "toToken": {"address": "0x0000000000000000000000000000000000000000", "chainId": 56, "symbol": "BNB", "decimals": 18, "name": "BNB"},
            "fromChainId": 1,
            "toChainId": 56,
            "slippage": 0.005,
            "fromAddress": "0x8ba1f109551bd432803012645ac136ddd64dba72",
            "toAddress": "0x8ba1f109551bd432803012645ac136ddd64dba72"
        },
        "estimate": {
            "tool": "stargateV2",
            "approvalAddress": "0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae",
            "toAmountMin": "6120000000000000000",
            "toAmount": "6150771234567890123",
            "fromAmount": "1500000000000000000",
            "executionDuration": 64.5,
            "fromAmountUSD": "3750.18",
            "toAmountUSD": "3712.40"
        },
        "includedSteps": [],
        "transactionRequest": {
            "from": "0x8ba1f109551bd432803012645ac136ddd64dba72",
            "to": "0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae",
            "chainId": 1,
            "data": "0xdeadbeef",
            "value": "0x14d1120d7b160000",
            "gasPrice": "0x3b9aca00",
            "gasLimit": "0x7a120"
        }
    }"#;

    #[test]
    fn test_parse_quote() {
        let step: Step = serde_json::from_str(QUOTE_JSON).unwrap();
        let quote = Quote::from_step(step);

        assert_eq!(quote.source_amount, "1500000000000000000");
        assert_eq!(quote.dest_amount, "6150771234567890123");
        assert_eq!(quote.dest_amount_formatted(6).unwrap(), "6.150771");
        assert_eq!(quote.from_amount_usd.as_deref(), Some("3750.18"));
        assert_eq!(quote.step.action.to_chain_id, 56);

        let tx = quote.step.transaction_request.as_ref().unwrap();
        assert_eq!(tx.chain_id, Some(1));
        assert_eq!(tx.gas_limit.as_deref(), Some("0x7a120"));
        assert!(quote.step.extra.contains_key("toolDetails"));
    }

    #[test]
    fn test_step_round_trips_service_fields() {
        let step: Step = serde_json::from_str(QUOTE_JSON).unwrap();
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "lifi");
        assert_eq!(value["includedSteps"], serde_json::json!([]));
        assert_eq!(value["estimate"]["approvalAddress"], "0x1231deb6f5749ef6ce6943a275a1d3e7486f4eae");
    }

    #[test]
    fn test_parse_tokens_response() {
        let json = r#"{"tokens": {"56": [
            {"address": "0x0000000000000000000000000000000000000000", "chainId": 56, "symbol": "BNB", "decimals": 18, "name": "BNB", "logoURI": "https://example.org/bnb.png"},
            {"address": "0x55d398326f99059fF775485246999027B3197955", "chainId": 56, "symbol": "USDT", "decimals": 18, "name": "Tether USD"}
        ]}}"#;
        let mut body: TokensResponse = serde_json::from_str(json).unwrap();
        let tokens = body.tokens.remove("56").unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].is_native());
    }

    #[test]
    fn test_parse_status_response() {
        let json = r#"{
            "transactionId": "0x11",
            "sending": {"txHash": "0xaaa", "chainId": 1},
            "receiving": {"txHash": "0xbbb", "chainId": 56},
            "status": "DONE",
            "substatus": "COMPLETED",
            "substatusMessage": "The transfer is complete."
        }"#;
        let status: StatusResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(status.status, TransferStatus::Done));
        let receiving = status.receiving.unwrap();
        assert_eq!(receiving.tx_hash.as_deref(), Some("0xbbb"));
        assert_eq!(receiving.chain_id, Some(56));

        let pending: StatusResponse =
            serde_json::from_str(r#"{"status": "NOT_FOUND"}"#).unwrap();
        assert!(matches!(pending.status, TransferStatus::NotFound));
    }

    #[test]
    fn test_rejection_carries_service_code() {
        let err = rejection(
            StatusCode::NOT_FOUND,
            r#"{"message": "No available quotes for the requested transfer", "code": 1002}"#,
        );
        match &err {
            BridgeError::QuoteRejected { status, code, .. } => {
                assert_eq!(*status, 404);
                assert_eq!(*code, Some(1002));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            QuoteFailure::classify(&err).kind,
            QuoteFailureKind::NoRouteAvailable
        );

        let err = rejection(StatusCode::BAD_GATEWAY, "");
        assert!(err.is_transient());
        assert!(err.to_string().contains("502"));
    }
}
