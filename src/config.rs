//! Configuration management
//!
//! Loads JSON configuration files with serde defaults so partial configs
//! work out of the box. Secrets (Telegram credentials) are never part of
//! the file; they come from the environment (`.env` supported).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub trailing: TrailingConfig,
    pub strategy_name: String,
    /// Strategy-specific parameters, deserialized by the selected strategy
    pub strategy: serde_json::Value,
    pub backtest: BacktestConfig,
    pub bot: BotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exchange: ExchangeConfig::default(),
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
            trailing: TrailingConfig::default(),
            strategy_name: "sma_cross".to_string(),
            strategy: serde_json::json!({}),
            backtest: BacktestConfig::default(),
            bot: BotConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks on values the core depends on
    pub fn validate(&self) -> Result<()> {
        if self.trading.initial_capital <= 0.0 {
            anyhow::bail!("initial_capital must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.trading.risk_per_trade) || self.trading.risk_per_trade == 0.0
        {
            anyhow::bail!("risk_per_trade must be a fraction in (0, 1]");
        }
        if self.trading.max_positions == 0 {
            anyhow::bail!("max_positions must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.trading.max_portfolio_exposure)
            || self.trading.max_portfolio_exposure == 0.0
        {
            anyhow::bail!("max_portfolio_exposure must be a fraction in (0, 1]");
        }
        if self.trading.pairs.is_empty() {
            anyhow::bail!("at least one trading pair is required");
        }
        Ok(())
    }
}

/// Exchange execution assumptions (fees and fill model)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Commission per leg as a fraction of notional
    pub taker_fee: f64,
    /// Fill slippage as a fraction of price, applied against us on both legs
    pub assumed_slippage: f64,
    /// Minimum order increment in base currency; sizes are floored to it
    pub lot_size: f64,
    /// Minimum order value in quote currency (dust guard)
    pub min_notional: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            taker_fee: 0.001,         // 0.1%
            assumed_slippage: 0.0005, // 0.05%
            lot_size: 0.000001,
            min_notional: 10.0,
        }
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub pairs: Vec<String>,
    pub timeframe: String,
    pub initial_capital: f64,
    /// Fraction of capital risked per trade (0.02 = 2%)
    pub risk_per_trade: f64,
    pub max_positions: usize,
    /// Cap on total open notional as a fraction of capital
    pub max_portfolio_exposure: f64,
    /// Stop-loss distance from entry as a fraction of price
    pub stop_loss_pct: f64,
    /// Take-profit distance from entry as a fraction of price
    pub take_profit_pct: f64,
    /// Close positions older than this many hours; 0 disables the timeout
    pub max_hold_hours: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            pairs: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            timeframe: "1h".to_string(),
            initial_capital: 10_000.0,
            risk_per_trade: 0.02,
            max_positions: 3,
            max_portfolio_exposure: 0.50,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            max_hold_hours: 0,
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.pairs.iter().map(|s| Symbol::new(s.clone())).collect()
    }
}

/// Portfolio-level risk guardrails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub enable_kill_switch: bool,
    /// Drawdown fraction that activates the kill switch
    pub max_drawdown: f64,
    pub max_consecutive_losses: usize,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            enable_kill_switch: true,
            max_drawdown: 0.10,
            max_consecutive_losses: 5,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Trailing-stop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    /// Unrealized profit fraction that arms the trail
    pub activation_pct: f64,
    /// Callback distance from the high-water mark, as a fraction of price
    pub distance_pct: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        TrailingConfig {
            enabled: false,
            activation_pct: 0.015,
            distance_pct: 0.008,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
    /// Annual risk-free rate used by Sharpe/Sortino
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            risk_free_rate: 0.02,
        }
    }
}

/// Live-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub update_interval_secs: u64,
    pub state_dir: String,
    /// How many candles to keep per symbol for indicator warmup
    pub candle_history: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            update_interval_secs: 300,
            state_dir: "state".to_string(),
            candle_history: 200,
        }
    }
}
