//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime into `SecretString`s.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::engine::executor::ExecutionMode;
use crate::strategy::exposure::ExposureBasis;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub signal: SignalConfig,
    pub onchain: OnchainConfig,
    pub market: MarketConfig,
    pub strategy: StrategyConfig,
    pub execution: ExecutionConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub state_file: Option<String>,
    #[serde(default = "default_max_activity_events")]
    pub max_activity_events: usize,
}

/// Allora consumer API.
#[derive(Debug, Deserialize, Clone)]
pub struct SignalConfig {
    pub base_url: String,
    /// Chain slug in the consumer path, e.g. "ethereum-11155111".
    pub chain: String,
    #[serde(default = "default_topic_id")]
    pub topic_id: u64,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Onchain-actions (GMX plugin) service.
#[derive(Debug, Deserialize, Clone)]
pub struct OnchainConfig {
    pub base_url: String,
    pub chain_ids: Vec<u64>,
    pub wallet_address: String,
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub index_symbol: String,
    pub collateral_symbol: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Minimum relative move (percent) of the prediction before acting.
    #[serde(default)]
    pub decision_threshold_pct: Decimal,
    pub exposure_cap_usd: Decimal,
    #[serde(default)]
    pub exposure_basis: ExposureBasis,
    pub order_size_usd: Decimal,
    #[serde(default = "default_min_order_usd")]
    pub min_order_usd: Decimal,
    pub leverage: Decimal,
    #[serde(default)]
    pub max_position_usd: Option<Decimal>,
    /// Close an assumed position once it has been open this long.
    #[serde(default)]
    pub max_hold_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// EVM JSON-RPC endpoint used to broadcast signed transactions (execute mode only).
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub lifecycle_poll_interval_ms: u64,
    pub lifecycle_max_attempts: u32,
    /// Env var holding the hex signing key (execute mode only).
    #[serde(default)]
    pub private_key_env: Option<String>,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_max_activity_events() -> usize {
    500
}

fn default_topic_id() -> u64 {
    crate::signal::allora::DEFAULT_TOPIC_ID
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_provider_name() -> String {
    "GMX".to_string()
}

fn default_min_order_usd() -> Decimal {
    dec!(10)
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.onchain.chain_ids.is_empty() {
            anyhow::bail!("onchain.chain_ids must list at least one chain");
        }
        if self.strategy.leverage <= Decimal::ZERO {
            anyhow::bail!("strategy.leverage must be positive");
        }
        if self.strategy.exposure_cap_usd < Decimal::ZERO {
            anyhow::bail!("strategy.exposure_cap_usd must not be negative");
        }
        if self.strategy.max_hold_secs == Some(0) {
            anyhow::bail!("strategy.max_hold_secs must be positive when set");
        }
        if self.execution.mode == ExecutionMode::Execute {
            if self.execution.rpc_url.is_none() {
                anyhow::bail!("execution.rpc_url is required in execute mode");
            }
            if self.execution.private_key_env.is_none() {
                anyhow::bail!("execution.private_key_env is required in execute mode");
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret referenced by env-var name.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
