//! Market-condition circuit breaker
//!
//! Pauses new entries for a symbol while the market looks unhealthy:
//! volatility far above its rolling baseline, volume collapsing below
//! the rolling average, or the bid/ask spread blowing out.
//!
//! The breaker is a pure per-tick predicate: it never mutates positions
//! and carries no cooldown. A symbol that trips this tick is simply
//! re-evaluated on the next one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Candle, Symbol};

/// Window for the rolling volatility baseline
const VOLATILITY_WINDOW: usize = 20;
/// Returns used for the "current" volatility estimate
const RECENT_RETURNS: usize = 5;
/// Candles considered for the average-volume baseline
const VOLUME_WINDOW: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Trip when current volatility exceeds baseline by this multiple
    pub volatility_multiple: f64,
    /// Trip when volume drops below this fraction of the rolling average
    pub volume_floor: f64,
    /// Trip when the bid/ask spread exceeds this many percent
    pub max_spread_pct: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            enabled: true,
            volatility_multiple: 5.0,
            volume_floor: 0.2,
            max_spread_pct: 0.5,
        }
    }
}

/// Per-symbol market anomaly detector
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    /// First-seen rolling volatility per symbol, the comparison baseline
    baseline_volatility: HashMap<Symbol, f64>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            baseline_volatility: HashMap::new(),
        }
    }

    /// Check all conditions for the symbol. Returns the trip reason, or
    /// `None` when trading may proceed.
    pub fn evaluate(
        &mut self,
        symbol: &Symbol,
        candles: &[Candle],
        current_volume: f64,
        bid: Option<f64>,
        ask: Option<f64>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        if let Some(reason) = self.check_volatility(symbol, candles) {
            tracing::warn!("{}: circuit breaker - {}", symbol, reason);
            return Some(reason);
        }
        if let Some(reason) = self.check_volume(candles, current_volume) {
            tracing::warn!("{}: circuit breaker - {}", symbol, reason);
            return Some(reason);
        }
        if let Some(reason) = self.check_spread(bid, ask) {
            tracing::warn!("{}: circuit breaker - {}", symbol, reason);
            return Some(reason);
        }

        None
    }

    fn check_volatility(&mut self, symbol: &Symbol, candles: &[Candle]) -> Option<String> {
        if candles.len() < VOLATILITY_WINDOW + 1 {
            return None;
        }

        let returns: Vec<f64> = candles
            .windows(2)
            .filter(|w| w[0].close > 0.0)
            .map(|w| (w[1].close - w[0].close) / w[0].close)
            .collect();
        if returns.len() < VOLATILITY_WINDOW {
            return None;
        }

        // Baseline: mean of the rolling std over the full history,
        // captured the first time the symbol is seen
        let baseline = *self.baseline_volatility.entry(symbol.clone()).or_insert_with(|| {
            let stds: Vec<f64> = returns
                .windows(VOLATILITY_WINDOW)
                .map(sample_std)
                .collect();
            stds.iter().sum::<f64>() / stds.len() as f64
        });

        let recent = &returns[returns.len().saturating_sub(RECENT_RETURNS)..];
        let current = sample_std(recent);

        if baseline > 0.0 && current > baseline * self.config.volatility_multiple {
            return Some(format!(
                "extreme volatility: {:.4} > {:.1}x baseline {:.4}",
                current, self.config.volatility_multiple, baseline
            ));
        }
        None
    }

    fn check_volume(&self, candles: &[Candle], current_volume: f64) -> Option<String> {
        if candles.len() < VOLATILITY_WINDOW {
            return None;
        }

        let tail = &candles[candles.len().saturating_sub(VOLUME_WINDOW)..];
        let avg_volume = tail.iter().map(|c| c.volume).sum::<f64>() / tail.len() as f64;

        if avg_volume > 0.0 && current_volume < avg_volume * self.config.volume_floor {
            return Some(format!(
                "low volume: {:.0} < {:.0}% of avg {:.0}",
                current_volume,
                self.config.volume_floor * 100.0,
                avg_volume
            ));
        }
        None
    }

    fn check_spread(&self, bid: Option<f64>, ask: Option<f64>) -> Option<String> {
        let (bid, ask) = (bid?, ask?);
        if bid <= 0.0 || ask <= 0.0 {
            return None;
        }

        let mid = (bid + ask) / 2.0;
        let spread_pct = (ask - bid) / mid * 100.0;
        if spread_pct > self.config.max_spread_pct {
            return Some(format!(
                "high spread: {:.2}% > {:.2}%",
                spread_pct, self.config.max_spread_pct
            ));
        }
        None
    }
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
