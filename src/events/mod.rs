//! Session notifications
//!
//! Outcomes the presentation layer surfaces to the user (chain switches, name
//! resolution, quote results, execution results) are published as
//! `SessionEvent`s on a broadcast channel.

use crate::chain::ChainId;
use crate::execution::ExecutionOutcome;
use crate::quote::QuoteFailure;

use serde::Serialize;

/// Notification emitted by a transfer session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Wallet switched to the new source chain
    ChainSwitched { chain_id: ChainId },

    /// Wallet refused or failed the chain switch
    ChainSwitchFailed { chain_id: ChainId, reason: String },

    /// Recipient name resolved and the recipient field overwritten
    NameResolved { name: String, address: String },

    /// Name has no address
    NameNotFound { name: String },

    /// Resolution service failed
    NameResolutionFailed { name: String, reason: String },

    /// A quote was applied for the current selection
    QuoteReady {
        generation: u64,
        dest_amount_formatted: String,
    },

    /// A quote request failed for the current selection
    QuoteFailed { generation: u64, failure: QuoteFailure },

    /// Source-token balances were published
    BalancesUpdated { chain_id: ChainId, with_balance: usize },

    /// Route execution finished
    ExecutionFinished { outcome: ExecutionOutcome },
}

impl SessionEvent {
    /// Stable event name used for logging and metrics
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ChainSwitched { .. } => "ChainSwitched",
            SessionEvent::ChainSwitchFailed { .. } => "ChainSwitchFailed",
            SessionEvent::NameResolved { .. } => "NameResolved",
            SessionEvent::NameNotFound { .. } => "NameNotFound",
            SessionEvent::NameResolutionFailed { .. } => "NameResolutionFailed",
            SessionEvent::QuoteReady { .. } => "QuoteReady",
            SessionEvent::QuoteFailed { .. } => "QuoteFailed",
            SessionEvent::BalancesUpdated { .. } => "BalancesUpdated",
            SessionEvent::ExecutionFinished { .. } => "ExecutionFinished",
        }
    }

    /// True for events the user should see as an error notification
    pub fn is_failure(&self) -> bool {
        match self {
            SessionEvent::ChainSwitchFailed { .. }
            | SessionEvent::NameNotFound { .. }
            | SessionEvent::NameResolutionFailed { .. }
            | SessionEvent::QuoteFailed { .. } => true,
            SessionEvent::ExecutionFinished { outcome } => !outcome.is_success(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::QuoteFailureKind;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SessionEvent::NameResolved {
            name: "alice.eth".to_string(),
            address: "0x8ba1f109551bd432803012645ac136ddd64dba72".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "name_resolved");
        assert_eq!(json["name"], "alice.eth");
        assert!(!event.is_failure());
    }

    #[test]
    fn test_failure_events() {
        let event = SessionEvent::QuoteFailed {
            generation: 3,
            failure: QuoteFailure {
                kind: QuoteFailureKind::NoRouteAvailable,
                message: "No available quotes".to_string(),
            },
        };
        assert!(event.is_failure());
        assert_eq!(event.name(), "QuoteFailed");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["failure"]["kind"], "no_route_available");
    }
}
