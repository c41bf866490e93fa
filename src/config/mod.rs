//! Assembled runtime configuration.
//!
//! The core does not parse configuration files; an operator-facing
//! collaborator hands it these structures fully merged. The `server` binary
//! only reads the handful of environment variables it needs to bootstrap.

use crate::domain::risk::RiskParameters;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Scalar override value for strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    pub enabled: bool,
    pub testnet: bool,
    /// Opaque to the core; forwarded to the driver untouched.
    pub credentials: HashMap<String, String>,
    pub symbols: Vec<String>,
}

/// One strategy instance: a (exchange, symbol, strategy-name) triple plus
/// its merged overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub exchange: String,
    pub symbol: String,
    pub name: String,
    pub script_path: PathBuf,
    pub overrides: HashMap<String, ConfigValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceSpec {
    pub exchange: String,
    pub script_path: PathBuf,
    pub overrides: HashMap<String, ConfigValue>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub exchanges: Vec<ExchangeConfig>,
    pub strategies: Vec<StrategySpec>,
    pub rebalance: Option<RebalanceSpec>,
    pub risk: RiskParameters,
    /// Taker fee fraction applied per synthesized fill.
    pub fee_rate: Decimal,
    /// Driver snapshot reconciliation cadence for the portfolio worker.
    pub sync_interval: Duration,
    /// Wall-clock budget per script callback.
    pub callback_budget: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tradecore.db".to_string(),
            exchanges: Vec::new(),
            strategies: Vec::new(),
            rebalance: None,
            risk: RiskParameters::default(),
            fee_rate: dec!(0.001),
            sync_interval: Duration::from_secs(300),
            callback_budget: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Bootstrap configuration for the headless server. Everything beyond
    /// these basics arrives pre-merged from the operator surface.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(fee) = std::env::var("FEE_RATE")
            && let Ok(parsed) = fee.parse::<Decimal>()
        {
            config.fee_rate = parsed;
        }
        if let Ok(budget) = std::env::var("CALLBACK_BUDGET_MS")
            && let Ok(ms) = budget.parse::<u64>()
        {
            config.callback_budget = Duration::from_millis(ms);
        }
        config
    }
}
