//! Automated crypto trading bot
//!
//! The core of the system is the risk-and-position-lifecycle pipeline:
//! sizing against capital and exposure limits, tracking positions
//! through stop/target/trailing transitions, and portfolio guardrails
//! (kill switch, circuit breaker). The same pipeline drives live paper
//! trading and the deterministic backtester, so the two produce
//! identical trades for identical price paths.
//!
//! # Quick backtest
//! ```no_run
//! use tradebot::backtest::Backtester;
//! use tradebot::{data, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/default.json")?;
//!     let candles = data::load_multi_symbol("data", &config.trading.symbols(), "1h")?;
//!     let report = Backtester::new(config).run(candles)?;
//!     println!("Sharpe: {:.2}", report.metrics.sharpe_ratio);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod circuit_breaker;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod metrics;
pub mod notify;
pub mod position;
pub mod risk;
pub mod sizing;
pub mod store;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::{DataError, TradeError};
pub use strategies::Strategy;
pub use types::*;
