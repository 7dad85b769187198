//! SMA crossover strategy
//!
//! Golden cross (short SMA crossing above long SMA) buys, death cross
//! sells. The workhorse trend-following setup for larger timeframes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{Strategy, StrategySignal};
use crate::indicators::sma;
use crate::{Candle, Config, SignalKind, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmaCrossConfig {
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for SmaCrossConfig {
    fn default() -> Self {
        SmaCrossConfig {
            short_period: 20,
            long_period: 50,
        }
    }
}

pub struct SmaCrossStrategy {
    config: SmaCrossConfig,
}

impl SmaCrossStrategy {
    pub fn new(config: SmaCrossConfig) -> Self {
        SmaCrossStrategy { config }
    }
}

/// Factory for the strategy registry
pub fn create(config: &Config) -> Result<Box<dyn Strategy>> {
    let cfg: SmaCrossConfig = serde_json::from_value(config.strategy.clone())?;
    if cfg.short_period >= cfg.long_period {
        anyhow::bail!(
            "short_period ({}) must be below long_period ({})",
            cfg.short_period,
            cfg.long_period
        );
    }
    Ok(Box::new(SmaCrossStrategy::new(cfg)))
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &'static str {
        "sma_cross"
    }

    fn min_candles(&self) -> usize {
        self.config.long_period + 2
    }

    fn evaluate(&self, symbol: &Symbol, candles: &[Candle]) -> Option<StrategySignal> {
        if candles.len() < self.min_candles() {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let short = sma(&closes, self.config.short_period);
        let long = sma(&closes, self.config.long_period);

        let n = closes.len();
        let (s_now, l_now) = (short[n - 1]?, long[n - 1]?);
        let (s_prev, l_prev) = (short[n - 2]?, long[n - 2]?);

        // Confidence scales with how decisively the averages separated
        let strength = ((s_now - l_now).abs() / l_now * 200.0).clamp(0.05, 1.0);

        if s_prev <= l_prev && s_now > l_now {
            tracing::info!(
                "[{}] Golden cross: SMA{} {:.2} over SMA{} {:.2}",
                symbol,
                self.config.short_period,
                s_now,
                self.config.long_period,
                l_now
            );
            return Some(StrategySignal::new(SignalKind::Buy, strength));
        }

        if s_prev >= l_prev && s_now < l_now {
            tracing::info!(
                "[{}] Death cross: SMA{} {:.2} under SMA{} {:.2}",
                symbol,
                self.config.short_period,
                s_now,
                self.config.long_period,
                l_now
            );
            return Some(StrategySignal::new(SignalKind::Sell, strength));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::hours(i as i64),
                open: c,
                high: c * 1.001,
                low: c * 0.999,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    fn strategy() -> SmaCrossStrategy {
        SmaCrossStrategy::new(SmaCrossConfig {
            short_period: 3,
            long_period: 6,
        })
    }

    #[test]
    fn no_signal_with_insufficient_history() {
        let s = strategy();
        let series = candles(&[100.0, 101.0, 102.0]);
        assert!(s.evaluate(&Symbol::new("BTCUSDT"), &series).is_none());
    }

    #[test]
    fn golden_cross_buys() {
        let s = strategy();
        // Downtrend then a sharp reversal drags the short SMA through the long
        let series = candles(&[110.0, 108.0, 106.0, 104.0, 102.0, 100.0, 99.0, 104.0, 112.0]);
        let signal = s.evaluate(&Symbol::new("BTCUSDT"), &series).unwrap();
        assert_eq!(signal.kind, SignalKind::Buy);
        assert!(signal.strength > 0.0 && signal.strength <= 1.0);
    }

    #[test]
    fn death_cross_sells() {
        let s = strategy();
        let series = candles(&[100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 111.0, 106.0, 98.0]);
        let signal = s.evaluate(&Symbol::new("BTCUSDT"), &series).unwrap();
        assert_eq!(signal.kind, SignalKind::Sell);
    }

    #[test]
    fn steady_trend_stays_quiet() {
        let s = strategy();
        let series = candles(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 107.0, 108.0]);
        assert!(s.evaluate(&Symbol::new("BTCUSDT"), &series).is_none());
    }

    #[test]
    fn create_rejects_inverted_periods() {
        let mut config = Config::default();
        config.strategy = serde_json::json!({"short_period": 50, "long_period": 20});
        assert!(create(&config).is_err());
    }
}
