//! Quotes, routes and the external quote & execution service
//!
//! This module provides:
//! - The quote request tuple and route ordering preference
//! - Step/process types shared by quotes, routes and execution progress
//! - The `QuoteService` seam implemented by the LI.FI client
//! - Classification of quote failures into user-facing reasons

pub mod lifi;

pub use lifi::LifiClient;

use crate::amount;
use crate::chain::ChainId;
use crate::error::{BridgeError, BridgeResult};
use crate::execution::ExecutionEvent;
use crate::tokens::TokenDescriptor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Route ordering preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteOrder {
    #[default]
    Fastest,
    Cheapest,
}

impl RouteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteOrder::Fastest => "FASTEST",
            RouteOrder::Cheapest => "CHEAPEST",
        }
    }
}

/// Parameters of one quote request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_token: String,
    pub to_token: String,
    /// Integer amount in source token base units
    pub from_amount: String,
    pub from_address: String,
    pub to_address: String,
    pub slippage: f64,
    pub order: RouteOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAction {
    pub from_token: TokenDescriptor,
    pub to_token: TokenDescriptor,
    pub from_amount: String,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEstimate {
    pub from_amount: String,
    pub to_amount: String,
    pub to_amount_min: String,
    /// Spender that must be approved for ERC-20 source tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_address: Option<String>,
    #[serde(default)]
    pub execution_duration: f64,
    #[serde(rename = "fromAmountUSD", default, skip_serializing_if = "Option::is_none")]
    pub from_amount_usd: Option<String>,
    #[serde(rename = "toAmountUSD", default, skip_serializing_if = "Option::is_none")]
    pub to_amount_usd: Option<String>,
}

/// Unsigned transaction as returned by the routing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTransaction {
    pub to: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessType {
    TokenAllowance,
    Swap,
    CrossChain,
    ReceivingChain,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Started,
    ActionRequired,
    Pending,
    Failed,
    Done,
    Cancelled,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Done | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }
}

/// One on-chain action within a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Chain the transaction was sent on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Process {
    pub fn new(process_type: ProcessType, chain_id: ChainId) -> Self {
        Self {
            process_type,
            status: ProcessStatus::Started,
            tx_hash: None,
            chain_id: Some(chain_id),
            message: None,
        }
    }
}

/// Execution state of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub status: ProcessStatus,
    #[serde(default)]
    pub process: Vec<Process>,
}

impl Default for StepExecution {
    fn default() -> Self {
        Self {
            status: ProcessStatus::Started,
            process: Vec::new(),
        }
    }
}

/// A step of a route
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub tool: String,
    pub action: StepAction,
    pub estimate: StepEstimate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_request: Option<StepTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<StepExecution>,
    /// Service fields carried through untouched (tool details, included steps, costs)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A quote valid for exactly the request that produced it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub source_amount: String,
    pub dest_amount: String,
    pub dest_amount_min: String,
    #[serde(rename = "fromAmountUSD", skip_serializing_if = "Option::is_none")]
    pub from_amount_usd: Option<String>,
    #[serde(rename = "toAmountUSD", skip_serializing_if = "Option::is_none")]
    pub to_amount_usd: Option<String>,
    pub execution_duration: f64,
    pub step: Step,
}

impl Quote {
    pub fn from_step(step: Step) -> Self {
        Self {
            id: step.id.clone(),
            source_amount: step.action.from_amount.clone(),
            dest_amount: step.estimate.to_amount.clone(),
            dest_amount_min: step.estimate.to_amount_min.clone(),
            from_amount_usd: step.estimate.from_amount_usd.clone(),
            to_amount_usd: step.estimate.to_amount_usd.clone(),
            execution_duration: step.estimate.execution_duration,
            step,
        }
    }

    /// Destination amount with exactly `precision` fractional digits
    pub fn dest_amount_formatted(&self, precision: u8) -> BridgeResult<String> {
        amount::format_fixed(
            &self.dest_amount,
            self.step.action.to_token.decimals,
            precision,
        )
    }
}

/// Executable plan derived from a quote
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub from_chain_id: ChainId,
    pub to_chain_id: ChainId,
    pub from_amount: String,
    pub to_amount: String,
    pub from_token: TokenDescriptor,
    pub to_token: TokenDescriptor,
    pub steps: Vec<Step>,
}

impl Route {
    /// Structural conversion; no network access
    pub fn from_quote(quote: &Quote) -> Self {
        let action = &quote.step.action;
        Self {
            id: quote.id.clone(),
            from_chain_id: action.from_chain_id,
            to_chain_id: action.to_chain_id,
            from_amount: quote.source_amount.clone(),
            to_amount: quote.dest_amount.clone(),
            from_token: action.from_token.clone(),
            to_token: action.to_token.clone(),
            steps: vec![quote.step.clone()],
        }
    }
}

/// Channel on which step execution updates are reported
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Black-box quote and route execution provider
#[async_trait]
pub trait QuoteService: Send + Sync {
    /// Fetch a quote for the request
    async fn get_quote(&self, request: &QuoteRequest) -> BridgeResult<Quote>;

    /// Convert a quote into an executable route
    fn to_route(&self, quote: &Quote) -> Route {
        Route::from_quote(quote)
    }

    /// Execute every step of `route`, reporting each step/process change on `progress`
    async fn execute_route(&self, route: Route, progress: ProgressSender) -> BridgeResult<Route>;
}

/// User-facing reason a quote could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteFailureKind {
    NoRouteAvailable,
    InvalidRecipient,
    RouteTemporarilyUnavailable,
    Generic,
}

impl QuoteFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteFailureKind::NoRouteAvailable => "no_route_available",
            QuoteFailureKind::InvalidRecipient => "invalid_recipient",
            QuoteFailureKind::RouteTemporarilyUnavailable => "route_temporarily_unavailable",
            QuoteFailureKind::Generic => "generic",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            QuoteFailureKind::NoRouteAvailable => "No route available for this transfer",
            QuoteFailureKind::InvalidRecipient => {
                "Recipient address is not valid for the destination chain"
            }
            QuoteFailureKind::RouteTemporarilyUnavailable => {
                "Destination route is temporarily unavailable, try again shortly"
            }
            QuoteFailureKind::Generic => "Failed to get quote",
        }
    }
}

/// Classified quote failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteFailure {
    pub kind: QuoteFailureKind,
    /// Upstream detail
    pub message: String,
}

/// Service error codes for rate limiting, server, third-party and timeout errors
const TRANSIENT_CODES: [u32; 4] = [1005, 1006, 1008, 1009];
const NO_QUOTE_CODE: u32 = 1002;
const VALIDATION_CODE: u32 = 1011;

impl QuoteFailure {
    pub fn classify(error: &BridgeError) -> Self {
        let message = match error {
            BridgeError::QuoteRejected { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let code = match error {
            BridgeError::QuoteRejected { code, .. } => *code,
            _ => None,
        };
        let text = message.to_lowercase();

        let kind = if matches!(error, BridgeError::QuoteUnavailable)
            || code == Some(NO_QUOTE_CODE)
            || text.contains("unavailable route")
            || text.contains("no available quotes")
            || text.contains("no route")
        {
            QuoteFailureKind::NoRouteAvailable
        } else if text.contains("toaddress")
            || text.contains("invalid address")
            || text.contains("recipient")
            || (code == Some(VALIDATION_CODE) && text.contains("address"))
        {
            QuoteFailureKind::InvalidRecipient
        } else if code.is_some_and(|c| TRANSIENT_CODES.contains(&c))
            || text.contains("temporarily")
            || text.contains("unavailable")
            || text.contains("timeout")
            || error.is_transient()
        {
            QuoteFailureKind::RouteTemporarilyUnavailable
        } else {
            QuoteFailureKind::Generic
        };

        Self { kind, message }
    }
}
