//! Error taxonomy for the trading core.
//!
//! Every `TradeError` is recoverable-by-skip: the offending tick or
//! symbol is skipped and logged, and the loop continues. `DataError`
//! aborts a single backtest run without discarding results already
//! computed.

use thiserror::Error;

/// Recoverable trading-pipeline errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    /// Entry and stop coincide (or are non-finite); risk per unit is undefined
    #[error("invalid stop distance: entry={entry} stop={stop}")]
    InvalidStopDistance { entry: f64, stop: f64 },

    /// Portfolio limits leave no room for the position
    #[error("exposure limit exceeded: {0}")]
    ExposureLimitExceeded(String),

    /// Kill switch is active; no new positions until reset
    #[error("trading halted: {0}")]
    TradingHalted(String),

    /// Non-finite or non-positive market price; the tick is discarded
    #[error("invalid market price: {0}")]
    InvalidMarketPrice(f64),

    #[error("insufficient capital: need {needed:.2}, have {available:.2}")]
    InsufficientCapital { needed: f64, available: f64 },
}

/// Historical data errors; fatal to the backtest run they occur in
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("malformed candle for {symbol} at index {index}: {detail}")]
    MalformedCandle {
        symbol: String,
        index: usize,
        detail: String,
    },

    #[error("no candle data for {0}")]
    EmptySeries(String),
}
