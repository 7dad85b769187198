//! RSI + Bollinger Bands mean-reversion strategy
//!
//! Buys oversold extremes (RSI under threshold with price at the lower
//! band), sells overbought ones. Best suited to ranging markets.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{Strategy, StrategySignal};
use crate::indicators::{bollinger_bands, rsi};
use crate::{Candle, Config, SignalKind, Symbol};

/// Price within this factor of a band counts as touching it
const BAND_TOUCH_TOLERANCE: f64 = 0.002;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiBbConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub bb_period: usize,
    pub bb_std: f64,
}

impl Default for RsiBbConfig {
    fn default() -> Self {
        RsiBbConfig {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            bb_period: 20,
            bb_std: 2.0,
        }
    }
}

pub struct RsiBbStrategy {
    config: RsiBbConfig,
}

impl RsiBbStrategy {
    pub fn new(config: RsiBbConfig) -> Self {
        RsiBbStrategy { config }
    }
}

/// Factory for the strategy registry
pub fn create(config: &Config) -> Result<Box<dyn Strategy>> {
    let cfg: RsiBbConfig = serde_json::from_value(config.strategy.clone())?;
    Ok(Box::new(RsiBbStrategy::new(cfg)))
}

impl Strategy for RsiBbStrategy {
    fn name(&self) -> &'static str {
        "rsi_bb"
    }

    fn min_candles(&self) -> usize {
        self.config.rsi_period.max(self.config.bb_period) + 1
    }

    fn evaluate(&self, symbol: &Symbol, candles: &[Candle]) -> Option<StrategySignal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi_series = rsi(&closes, self.config.rsi_period);
        let (upper, _, lower) =
            bollinger_bands(&closes, self.config.bb_period, self.config.bb_std);

        let close = *closes.last().unwrap();
        let current_rsi = rsi_series.last().and_then(|&v| v)?;
        let upper_band = upper.last().and_then(|&v| v)?;
        let lower_band = lower.last().and_then(|&v| v)?;

        let oversold = current_rsi < self.config.rsi_oversold;
        let at_lower = close <= lower_band * (1.0 + BAND_TOUCH_TOLERANCE);
        if oversold && at_lower {
            let strength =
                (self.config.rsi_oversold - current_rsi) / self.config.rsi_oversold;
            tracing::info!(
                "[{}] Oversold reversion: RSI {:.1}, close {:.2} at lower band {:.2}",
                symbol,
                current_rsi,
                close,
                lower_band
            );
            return Some(StrategySignal::new(SignalKind::Buy, strength.max(0.1)));
        }

        let overbought = current_rsi > self.config.rsi_overbought;
        let at_upper = close >= upper_band * (1.0 - BAND_TOUCH_TOLERANCE);
        if overbought && at_upper {
            let strength = (current_rsi - self.config.rsi_overbought)
                / (100.0 - self.config.rsi_overbought);
            tracing::info!(
                "[{}] Overbought reversion: RSI {:.1}, close {:.2} at upper band {:.2}",
                symbol,
                current_rsi,
                close,
                upper_band
            );
            return Some(StrategySignal::new(SignalKind::Sell, strength.max(0.1)));
        }

        None
    }
}
