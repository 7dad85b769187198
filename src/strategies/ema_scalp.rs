//! EMA crossover scalping strategy
//!
//! Fast/slow EMA crossovers confirmed by a volume spike, meant for
//! short timeframes with tight stops.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{Strategy, StrategySignal};
use crate::indicators::{ema, sma};
use crate::{Candle, Config, SignalKind, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmaScalpConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    /// Lookback for the volume moving average
    pub volume_period: usize,
    /// Volume must exceed its average by this multiple
    pub volume_spike_threshold: f64,
}

impl Default for EmaScalpConfig {
    fn default() -> Self {
        EmaScalpConfig {
            fast_period: 8,
            slow_period: 21,
            volume_period: 20,
            volume_spike_threshold: 1.5,
        }
    }
}

pub struct EmaScalpStrategy {
    config: EmaScalpConfig,
}

impl EmaScalpStrategy {
    pub fn new(config: EmaScalpConfig) -> Self {
        EmaScalpStrategy { config }
    }

    /// Current volume relative to its moving average; 1.0 when unknown
    fn volume_ratio(&self, candles: &[Candle]) -> f64 {
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let avg = sma(&volumes, self.config.volume_period)
            .last()
            .and_then(|&v| v)
            .unwrap_or(0.0);
        if avg <= 0.0 {
            return 1.0;
        }
        volumes.last().unwrap() / avg
    }
}

/// Factory for the strategy registry
pub fn create(config: &Config) -> Result<Box<dyn Strategy>> {
    let cfg: EmaScalpConfig = serde_json::from_value(config.strategy.clone())?;
    if cfg.fast_period >= cfg.slow_period {
        anyhow::bail!(
            "fast_period ({}) must be below slow_period ({})",
            cfg.fast_period,
            cfg.slow_period
        );
    }
    Ok(Box::new(EmaScalpStrategy::new(cfg)))
}

impl Strategy for EmaScalpStrategy {
    fn name(&self) -> &'static str {
        "ema_scalp"
    }

    fn min_candles(&self) -> usize {
        self.config.slow_period.max(self.config.volume_period) + 2
    }

    fn evaluate(&self, symbol: &Symbol, candles: &[Candle]) -> Option<StrategySignal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = ema(&closes, self.config.fast_period);
        let slow = ema(&closes, self.config.slow_period);

        let n = closes.len();
        let (f_now, s_now) = (fast[n - 1]?, slow[n - 1]?);
        let (f_prev, s_prev) = (fast[n - 2]?, slow[n - 2]?);

        let crossed_up = f_prev <= s_prev && f_now > s_now;
        let crossed_down = f_prev >= s_prev && f_now < s_now;
        if !crossed_up && !crossed_down {
            return None;
        }

        let volume_ratio = self.volume_ratio(candles);
        if volume_ratio < self.config.volume_spike_threshold {
            tracing::debug!(
                "[{}] EMA cross without volume ({:.2}x < {:.2}x), skipped",
                symbol,
                volume_ratio,
                self.config.volume_spike_threshold
            );
            return None;
        }

        // Stronger volume behind the cross, stronger conviction
        let strength = (volume_ratio / (self.config.volume_spike_threshold * 2.0)).clamp(0.1, 1.0);

        let kind = if crossed_up {
            SignalKind::Buy
        } else {
            SignalKind::Sell
        };
        tracing::info!(
            "[{}] EMA{}/{} cross {} on {:.2}x volume",
            symbol,
            self.config.fast_period,
            self.config.slow_period,
            kind,
            volume_ratio
        );
        Some(StrategySignal::new(kind, strength))
    }
}
