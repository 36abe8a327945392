//! Configuration management for the Porta bridge core
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::ChainId;
use crate::quote::RouteOrder;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub lifi: LifiConfig,
    pub resolver: ResolverConfig,
    pub wallet: WalletConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

/// Transfer session behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Source chain selected when a session starts
    pub default_from_chain: ChainId,
    /// Quiet period before a changed selection is quoted
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on tokens listed and balance-checked per chain
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Fractional digits of the displayed destination amount
    #[serde(default = "default_display_decimals")]
    pub display_decimals: u8,
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    #[serde(default)]
    pub order: RouteOrder,
    /// Interval between destination status checks during execution
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_interval_ms: u64,
    /// Interval between wallet account checks
    #[serde(default = "default_account_poll_ms")]
    pub account_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifiConfig {
    pub api_url: String,
    pub integrator: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the signing key
    pub private_key_env: Option<String>,
    /// Watch-only account used when no signing key is present
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub enabled: bool,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_max_tokens() -> usize {
    50
}

fn default_display_decimals() -> u8 {
    crate::amount::DISPLAY_DECIMALS
}

fn default_slippage() -> f64 {
    0.005
}

fn default_status_poll_ms() -> u64 {
    5_000
}

fn default_account_poll_ms() -> u64 {
    2_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("PORTA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        // An unset `${LIFI_API_KEY}` substitutes to an empty string
        if settings
            .lifi
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            settings.lifi.api_key = None;
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        if self.bridge.debounce_ms == 0 {
            anyhow::bail!("bridge.debounce_ms must be greater than zero");
        }
        if self.bridge.account_poll_interval_ms == 0 {
            anyhow::bail!("bridge.account_poll_interval_ms must be greater than zero");
        }
        if self.bridge.max_tokens == 0 {
            anyhow::bail!("bridge.max_tokens must be greater than zero");
        }
        if !(self.bridge.slippage > 0.0 && self.bridge.slippage < 1.0) {
            anyhow::bail!("bridge.slippage must be between 0 and 1");
        }

        if self.get_chain_by_id(self.bridge.default_from_chain).is_none() {
            tracing::warn!(
                "Default source chain {} has no RPC configured - balances will be unavailable",
                self.bridge.default_from_chain
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

/// Minimal configuration shared by unit tests
#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
    [bridge]
    default_from_chain = 534352

    [lifi]
    api_url = "https://li.quest/v1"
    integrator = "porta-app"
    api_key = "${PORTA_TEST_UNSET_KEY}"

    [resolver]
    api_url = "https://api.ensideas.com"

    [wallet]
    private_key_env = "PORTA_PRIVATE_KEY"

    [api]
    host = "127.0.0.1"
    port = 8080

    [metrics]
    enabled = false
    port = 9090

    [chains.scroll]
    chain_id = 534352
    name = "Scroll"
    rpc_urls = ["https://rpc.scroll.io"]
    enabled = true
"#;
