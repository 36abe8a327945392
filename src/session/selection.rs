//! The mutable transfer request and its invalidation rules

use crate::chain::ChainId;

use serde::Serialize;

/// Fields the user edits to describe a transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_chain: Option<ChainId>,
    pub to_chain: Option<ChainId>,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    /// Human-readable source amount as typed
    pub amount: String,
    pub recipient: String,
    /// Formatted destination amount of the quote currently shown
    pub last_quoted_dest_amount: Option<String>,
}

/// The tuple a quote is valid for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub from_chain: Option<ChainId>,
    pub to_chain: Option<ChainId>,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub amount: String,
    pub recipient: String,
    pub account: Option<String>,
}

/// Side effects a selection change requires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    /// Ask the wallet to switch to this chain
    pub switch_chain: Option<ChainId>,
    pub reload_from_tokens: bool,
    pub reload_to_tokens: bool,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }
}

impl TransferRequest {
    /// Fresh request on the default source chain with an empty destination
    pub fn new(default_from_chain: ChainId) -> Self {
        Self {
            from_chain: Some(default_from_chain),
            ..Default::default()
        }
    }

    /// Select the source chain; the source token and amount belong to the old chain
    pub fn set_from_chain(&mut self, chain_id: ChainId) -> Effects {
        if self.from_chain == Some(chain_id) {
            return Effects::none();
        }

        self.from_chain = Some(chain_id);
        self.from_token = None;
        self.amount.clear();

        Effects {
            switch_chain: Some(chain_id),
            reload_from_tokens: true,
            reload_to_tokens: false,
        }
    }

    /// Select the destination chain; the destination token belongs to the old chain
    pub fn set_to_chain(&mut self, chain_id: ChainId) -> Effects {
        if self.to_chain == Some(chain_id) {
            return Effects::none();
        }

        self.to_chain = Some(chain_id);
        self.to_token = None;

        Effects {
            reload_to_tokens: true,
            ..Effects::none()
        }
    }

    /// Exchange source and destination chains, clearing both tokens and the amount
    pub fn swap_chains(&mut self) -> Effects {
        std::mem::swap(&mut self.from_chain, &mut self.to_chain);
        self.from_token = None;
        self.to_token = None;
        self.amount.clear();

        Effects {
            switch_chain: self.from_chain,
            reload_from_tokens: self.from_chain.is_some(),
            reload_to_tokens: self.to_chain.is_some(),
        }
    }

    pub fn set_from_token(&mut self, address: Option<String>) {
        self.from_token = address;
    }

    pub fn set_to_token(&mut self, address: Option<String>) {
        self.to_token = address;
    }

    pub fn set_amount(&mut self, amount: impl Into<String>) {
        self.amount = amount.into();
    }

    pub fn set_recipient(&mut self, recipient: impl Into<String>) {
        self.recipient = recipient.into();
    }

    pub fn quote_key(&self, account: Option<&str>) -> QuoteKey {
        QuoteKey {
            from_chain: self.from_chain,
            to_chain: self.to_chain,
            from_token: self.from_token.clone(),
            to_token: self.to_token.clone(),
            amount: self.amount.trim().to_string(),
            recipient: self.recipient.trim().to_string(),
            account: account.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> TransferRequest {
        TransferRequest {
            from_chain: Some(1),
            to_chain: Some(56),
            from_token: Some("0xfrom".to_string()),
            to_token: Some("0xto".to_string()),
            amount: "1.5".to_string(),
            recipient: "0xrecipient".to_string(),
            last_quoted_dest_amount: None,
        }
    }

    #[test]
    fn test_from_chain_clears_token_and_amount() {
        let mut request = filled();
        let effects = request.set_from_chain(10);

        assert_eq!(request.from_chain, Some(10));
        assert!(request.from_token.is_none());
        assert!(request.amount.is_empty());
        assert_eq!(request.to_token.as_deref(), Some("0xto"));
        assert_eq!(effects.switch_chain, Some(10));
        assert!(effects.reload_from_tokens);
    }

    #[test]
    fn test_same_chain_is_noop() {
        let mut request = filled();
        assert_eq!(request.set_from_chain(1), Effects::none());
        assert_eq!(request, filled());
        assert_eq!(request.set_to_chain(56), Effects::none());
    }

    #[test]
    fn test_to_chain_clears_only_destination_token() {
        let mut request = filled();
        let effects = request.set_to_chain(8453);

        assert!(request.to_token.is_none());
        assert_eq!(request.from_token.as_deref(), Some("0xfrom"));
        assert_eq!(request.amount, "1.5");
        assert!(effects.switch_chain.is_none());
        assert!(effects.reload_to_tokens);
    }

    #[test]
    fn test_swap_chains() {
        let mut request = filled();
        let effects = request.swap_chains();

        assert_eq!(request.from_chain, Some(56));
        assert_eq!(request.to_chain, Some(1));
        assert!(request.from_token.is_none());
        assert!(request.to_token.is_none());
        assert!(request.amount.is_empty());
        assert_eq!(effects.switch_chain, Some(56));

        let mut half = TransferRequest::new(1);
        let effects = half.swap_chains();
        assert!(half.from_chain.is_none());
        assert_eq!(half.to_chain, Some(1));
        assert!(effects.switch_chain.is_none());
        assert!(!effects.reload_from_tokens);
    }

    #[test]
    fn test_quote_key_tracks_every_field() {
        let request = filled();
        let key = request.quote_key(Some("0xaccount"));

        let mut changed = request.clone();
        changed.set_amount("1.50001");
        assert_ne!(changed.quote_key(Some("0xaccount")), key);
        assert_ne!(request.quote_key(None), key);

        let mut cosmetic = request.clone();
        cosmetic.last_quoted_dest_amount = Some("4.000000".to_string());
        assert_eq!(cosmetic.quote_key(Some("0xaccount")), key);
    }
}
