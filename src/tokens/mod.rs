//! Token metadata and the per-chain token catalog

use crate::chain::{is_native_token, ChainId};
use crate::error::BridgeResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token listed on a chain, immutable once fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub chain_id: ChainId,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(rename = "logoURI", default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

impl TokenDescriptor {
    /// True when this is the chain's native asset
    pub fn is_native(&self) -> bool {
        is_native_token(self.chain_id, &self.address)
    }

    /// Case-insensitive address comparison
    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }

    /// Match on symbol or name (case-insensitive)
    pub fn matches(&self, search: &str) -> bool {
        let needle = search.trim().to_lowercase();
        needle.is_empty()
            || self.symbol.to_lowercase().contains(&needle)
            || self.name.to_lowercase().contains(&needle)
    }
}

/// Source of the token list for a chain
#[async_trait]
pub trait TokenCatalog: Send + Sync {
    async fn list_tokens(&self, chain_id: ChainId) -> BridgeResult<Vec<TokenDescriptor>>;
}

/// Find a token by address in a chain-scoped list
pub fn find_token<'a>(tokens: &'a [TokenDescriptor], address: &str) -> Option<&'a TokenDescriptor> {
    tokens.iter().find(|t| t.has_address(address))
}

/// Tokens whose symbol or name contains `search`
pub fn search_tokens<'a>(tokens: &'a [TokenDescriptor], search: &str) -> Vec<&'a TokenDescriptor> {
    tokens.iter().filter(|t| t.matches(search)).collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_deserialize_catalog_entry() {
        let json = r#"{
            "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "chainId": 1,
            "symbol": "USDC",
            "decimals": 6,
            "name": "USD Coin",
            "coinKey": "USDC",
            "logoURI": "https://static.debank.com/image/coin/logo_url/usdc/e87790bfe0b3f2ea855dc29069b38818.png",
            "priceUSD": "0.999"
        }"#;

        let token: TokenDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(token.chain_id, 1);
        assert_eq!(token.decimals, 6);
        assert!(token.logo_uri.is_some());
        assert!(!token.is_native());
        assert!(token.has_address("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"));
    }

    #[test]
    fn test_search() {
        let tokens = vec![native(1, "ETH"), token(1, "0x01", "USDC", 6), token(1, "0x02", "DAI", 18)];

        assert_eq!(search_tokens(&tokens, "usd").len(), 1);
        assert_eq!(search_tokens(&tokens, "token").len(), 3);
        assert_eq!(search_tokens(&tokens, "").len(), 3);
        assert_eq!(find_token(&tokens, "0x02").map(|t| t.symbol.as_str()), Some("DAI"));
        assert!(tokens[0].is_native());
    }
}
