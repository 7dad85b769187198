//! Simulated order execution
//!
//! Fills at the reference price moved against us by the assumed
//! slippage, charging the taker fee on notional. Deterministic, so
//! backtests and paper trading produce identical fills for identical
//! inputs.

use super::{ExecutionError, Fill, OrderExecutor, OrderSide};
use crate::config::ExchangeConfig;
use crate::Symbol;

#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    slippage: f64,
    fee_rate: f64,
}

impl SimulatedExecutor {
    pub fn new(slippage: f64, fee_rate: f64) -> Self {
        SimulatedExecutor { slippage, fee_rate }
    }

    pub fn from_config(cfg: &ExchangeConfig) -> Self {
        SimulatedExecutor::new(cfg.assumed_slippage, cfg.taker_fee)
    }
}

impl OrderExecutor for SimulatedExecutor {
    fn place_order(
        &mut self,
        _symbol: &Symbol,
        side: OrderSide,
        amount: f64,
        reference_price: f64,
    ) -> Result<Fill, ExecutionError> {
        if amount <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "non-positive amount {}",
                amount
            )));
        }
        if !reference_price.is_finite() || reference_price <= 0.0 {
            return Err(ExecutionError::Rejected(format!(
                "invalid reference price {}",
                reference_price
            )));
        }

        // Slippage always works against us
        let price = match side {
            OrderSide::Buy => reference_price * (1.0 + self.slippage),
            OrderSide::Sell => reference_price * (1.0 - self.slippage),
        };
        let fee = amount * price * self.fee_rate;

        Ok(Fill { price, fee })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn buy_fills_above_reference() {
        let mut exec = SimulatedExecutor::new(0.001, 0.001);
        let fill = exec
            .place_order(&Symbol::new("BTCUSDT"), OrderSide::Buy, 1.0, 50_000.0)
            .unwrap();
        assert_relative_eq!(fill.price, 50_050.0);
        assert_relative_eq!(fill.fee, 50.05);
    }

    #[test]
    fn sell_fills_below_reference() {
        let mut exec = SimulatedExecutor::new(0.001, 0.001);
        let fill = exec
            .place_order(&Symbol::new("BTCUSDT"), OrderSide::Sell, 1.0, 50_000.0)
            .unwrap();
        assert_relative_eq!(fill.price, 49_950.0);
    }

    #[test]
    fn zero_cost_model_fills_at_reference() {
        let mut exec = SimulatedExecutor::new(0.0, 0.0);
        let fill = exec
            .place_order(&Symbol::new("BTCUSDT"), OrderSide::Buy, 2.0, 100.0)
            .unwrap();
        assert_relative_eq!(fill.price, 100.0);
        assert_relative_eq!(fill.fee, 0.0);
    }

    #[test]
    fn rejects_nonsense_orders() {
        let mut exec = SimulatedExecutor::new(0.001, 0.001);
        assert!(exec
            .place_order(&Symbol::new("BTCUSDT"), OrderSide::Buy, 0.0, 100.0)
            .is_err());
        assert!(exec
            .place_order(&Symbol::new("BTCUSDT"), OrderSide::Buy, 1.0, f64::NAN)
            .is_err());
    }
}
