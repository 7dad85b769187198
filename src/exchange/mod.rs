//! Exchange collaborators
//!
//! The engine consumes two capabilities from here: a market-data feed
//! (the public Binance client) and an order-execution capability (the
//! [`OrderExecutor`] trait). Execution is simulated with a slippage and
//! taker-fee fill model, which keeps live paper trading and the
//! backtester on the exact same fill path.

pub mod binance;
pub mod paper;

pub use binance::{BinanceClient, TickerSnapshot};
pub use paper::SimulatedExecutor;

use thiserror::Error;

use crate::Symbol;

/// Order direction at the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        })
    }
}

/// Result of a filled market order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
}

/// Order-execution capability consumed by the engine.
///
/// A failed placement means the triggering signal is treated as not
/// taken; the engine records the reason and moves on.
pub trait OrderExecutor: Send {
    fn place_order(
        &mut self,
        symbol: &Symbol,
        side: OrderSide,
        amount: f64,
        reference_price: f64,
    ) -> Result<Fill, ExecutionError>;
}
