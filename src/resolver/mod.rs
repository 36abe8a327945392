//! Recipient name resolution (`*.eth` names to addresses)

use crate::config::ResolverConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

lazy_static! {
    static ref ENS_NAME: Regex =
        Regex::new(r"^[^\s.][^\s]*\.eth$").expect("valid ENS name pattern");
}

/// True when `input` looks like a resolvable name rather than an address
pub fn is_resolvable_name(input: &str) -> bool {
    ENS_NAME.is_match(&normalize_name(input))
}

/// Canonical form of a name as sent to the resolution service
pub fn normalize_name(input: &str) -> String {
    input.trim().to_lowercase()
}

/// External name resolution service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `name`; `Ok(None)` when the name has no address
    async fn resolve(&self, name: &str) -> BridgeResult<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    address: Option<String>,
}

/// Resolver backed by the public ENS HTTP API
pub struct EnsApiResolver {
    client: reqwest::Client,
    api_url: String,
}

impl EnsApiResolver {
    pub fn new(config: &ResolverConfig) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, name: &str) -> String {
        format!("{}/ens/resolve/{}", self.api_url, normalize_name(name))
    }
}

#[async_trait]
impl NameResolver for EnsApiResolver {
    async fn resolve(&self, name: &str) -> BridgeResult<Option<String>> {
        let url = self.lookup_url(name);
        debug!("Resolving {}", name);

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BridgeError::Resolution(format!(
                "resolver returned {} for {}",
                response.status(),
                name
            )));
        }

        let body: ResolveResponse = response.json().await?;
        Ok(body.address.filter(|address| !address.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_pattern() {
        assert!(is_resolvable_name("alice.eth"));
        assert!(is_resolvable_name("pay.alice.eth"));
        assert!(is_resolvable_name("Alice.ETH "));
        assert!(!is_resolvable_name("0x8ba1f109551bD432803012645Ac136ddd64DBA72"));
        assert!(!is_resolvable_name(".eth"));
        assert!(!is_resolvable_name("alice.sol"));
        assert!(!is_resolvable_name(""));
        assert!(!is_resolvable_name("alice .eth"));
    }

    #[test]
    fn test_name_pattern_accepts_any_label() {
        for name in ["_alice.eth", "🦊.eth", "café.eth", "alice_bob.eth", "123.eth"] {
            assert!(is_resolvable_name(name), "{} should resolve", name);
        }
    }

    #[test]
    fn test_names_are_normalized_before_lookup() {
        assert_eq!(normalize_name(" Alice.ETH "), "alice.eth");
        assert_eq!(normalize_name("alice.eth"), "alice.eth");
    }

    #[test]
    fn test_lookup_url_uses_lowercase_name() {
        let resolver = EnsApiResolver::new(&ResolverConfig {
            api_url: "https://ens.example.org/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        assert_eq!(
            resolver.lookup_url(" Alice.ETH"),
            "https://ens.example.org/ens/resolve/alice.eth"
        );
    }

    #[test]
    fn test_response_without_address() {
        let body: ResolveResponse =
            serde_json::from_str(r#"{"address": null, "name": "nobody.eth"}"#).unwrap();
        assert!(body.address.is_none());

        let body: ResolveResponse = serde_json::from_str(
            r#"{"address": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045", "name": "vitalik.eth"}"#,
        )
        .unwrap();
        assert_eq!(
            body.address.as_deref(),
            Some("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")
        );
    }
}
