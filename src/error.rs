//! Error types for the Porta bridge core

use crate::chain::ChainId;
use thiserror::Error;

/// Main error type for the transfer orchestration core
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: ChainId, message: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: ChainId },

    #[error("Failed to switch wallet to chain {chain_id}: {message}")]
    ChainSwitch { chain_id: ChainId, message: String },

    #[error("Chain {chain_id} is not supported by the connected wallet")]
    UnsupportedChainFamily { chain_id: ChainId },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Token {address} is not listed on chain {chain_id}")]
    UnknownToken { chain_id: ChainId, address: String },

    #[error("Missing information: {0}")]
    IncompleteRequest(String),

    #[error("No quote is available for the current selection")]
    QuoteUnavailable,

    #[error("Quote rejected ({status}): {message}")]
    QuoteRejected {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transaction error on chain {chain_id}: {message}")]
    Transaction { chain_id: ChainId, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution already in progress")]
    ExecutionInProgress,

    #[error("Name resolution error: {0}")]
    Resolution(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if the error comes from a transient upstream condition
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::ChainConnection { .. } => true,
            BridgeError::Http(e) => e.is_timeout() || e.is_connect(),
            BridgeError::QuoteRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if the error was caused by caller input rather than an upstream failure
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidAmount(_)
                | BridgeError::UnknownToken { .. }
                | BridgeError::IncompleteRequest(_)
                | BridgeError::QuoteUnavailable
                | BridgeError::WalletNotConnected
                | BridgeError::UnsupportedChainFamily { .. }
                | BridgeError::ExecutionInProgress
        )
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
