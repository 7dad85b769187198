//! Backtesting engine
//!
//! Deterministic replay of the live pipeline over historical candles.
//! The same [`Engine`](crate::engine::Engine) that drives live trading
//! consumes one snapshot per symbol per candle, so a backtest and a
//! live session fed the same prices produce identical trades.
//!
//! Candle extremes feed the stop/take-profit checks, and the exit
//! ordering in the lifecycle resolves a candle that touches both levels
//! to the stop (worst-case execution).

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::data;
use crate::engine::{Engine, MarketSnapshot};
use crate::error::{DataError, TradeError};
use crate::metrics;
use crate::{Candle, Config, EquityPoint, MarketTick, PerformanceMetrics, SignalRecord, Symbol, Trade};

/// Strategies only need a bounded history window; this covers every
/// indicator warmup in the registry with room to spare and keeps the
/// replay O(n*k) instead of O(n^2).
const MAX_LOOKBACK: usize = 300;

/// Everything a backtest run produces.
///
/// When `error` is set, the run aborted at that point; trades, signals,
/// and the equity curve hold everything computed before the fault.
#[derive(Debug, Default)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub signals: Vec<SignalRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub error: Option<DataError>,
}

/// One symbol's candles aligned to the shared timestamp axis.
/// `start` is the index of the symbol's first real candle.
struct AlignedSeries {
    symbol: Symbol,
    candles: Vec<Candle>,
    start: usize,
}

impl AlignedSeries {
    fn candle_at(&self, index: usize) -> Option<&Candle> {
        index.checked_sub(self.start).and_then(|i| self.candles.get(i))
    }

    /// Bounded history window ending at `index`, inclusive
    fn window(&self, index: usize) -> &[Candle] {
        let end = index - self.start + 1;
        let begin = end.saturating_sub(MAX_LOOKBACK);
        &self.candles[begin..end]
    }
}

/// Backtest driver
pub struct Backtester {
    config: Config,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester { config }
    }

    /// Replay the engine over multi-symbol candle data.
    ///
    /// Fails early only when the engine cannot be built (unknown
    /// strategy); data faults mid-run surface in `BacktestReport::error`
    /// with partial results intact.
    pub fn run(&self, data: HashMap<Symbol, Vec<Candle>>) -> anyhow::Result<BacktestReport> {
        let mut engine = Engine::new(&self.config)?;
        let mut report = BacktestReport::default();

        let (timestamps, aligned) = align_series(data);
        if aligned.is_empty() {
            tracing::error!("No candle data to backtest");
            report.error = Some(DataError::EmptySeries("no symbols".to_string()));
            return Ok(report);
        }

        tracing::info!(
            "Backtesting {} symbols over {} timestamps with strategy '{}'",
            aligned.len(),
            timestamps.len(),
            engine.strategy_name()
        );

        'replay: for (i, &timestamp) in timestamps.iter().enumerate() {
            for series in &aligned {
                let Some(candle) = series.candle_at(i) else {
                    continue;
                };

                if let Err(detail) = data::validate_candle(candle) {
                    let fault = DataError::MalformedCandle {
                        symbol: series.symbol.to_string(),
                        index: i,
                        detail,
                    };
                    tracing::error!("Backtest aborted: {}", fault);
                    report.error = Some(fault);
                    break 'replay;
                }

                let snapshot = MarketSnapshot {
                    timestamp,
                    tick: MarketTick {
                        last: candle.close,
                        high: candle.high,
                        low: candle.low,
                    },
                    bid: None,
                    ask: None,
                    volume: candle.volume,
                    candles: series.window(i),
                };

                match engine.evaluate_tick(&series.symbol, &snapshot) {
                    Ok(tick_report) => {
                        report.trades.extend(tick_report.closed);
                        if let Some(signal) = tick_report.signal {
                            report.signals.push(signal);
                        }
                    }
                    Err(TradeError::InvalidMarketPrice(price)) => {
                        tracing::warn!(
                            "{}: skipping tick at {} (invalid price {})",
                            series.symbol,
                            timestamp,
                            price
                        );
                    }
                    Err(e) => {
                        tracing::warn!("{}: tick skipped: {}", series.symbol, e);
                    }
                }
            }

            report.equity_curve.push(EquityPoint {
                timestamp,
                equity: engine.equity(),
            });
        }

        // Liquidate whatever is still open so every position produces a
        // trade; skipped when the run aborted, partial results stay as-is.
        if report.error.is_none() {
            if let Some(&last_ts) = timestamps.last() {
                report.trades.extend(engine.close_all(last_ts));
            }
        }

        report.metrics = metrics::calculate(
            &report.trades,
            &report.equity_curve,
            self.config.trading.initial_capital,
            self.config.backtest.risk_free_rate,
            metrics::periods_per_year(&self.config.trading.timeframe),
        );

        tracing::info!(
            "Backtest complete: {} trades, final equity {:.2}",
            report.trades.len(),
            report.metrics.final_capital
        );
        Ok(report)
    }
}

/// Align multi-symbol series on the union of their timestamps.
///
/// Gaps are forward-filled with the previous candle so every symbol has
/// a price at every shared timestamp; symbols sort lexicographically to
/// keep the replay order deterministic.
fn align_series(data: HashMap<Symbol, Vec<Candle>>) -> (Vec<DateTime<Utc>>, Vec<AlignedSeries>) {
    let mut timestamps: Vec<DateTime<Utc>> = data
        .values()
        .flat_map(|candles| candles.iter().map(|c| c.datetime))
        .collect();
    timestamps.sort_unstable();
    timestamps.dedup();

    let mut sorted_data: Vec<(Symbol, Vec<Candle>)> = data.into_iter().collect();
    sorted_data.sort_by(|a, b| a.0.cmp(&b.0));

    let mut aligned = Vec::with_capacity(sorted_data.len());
    for (symbol, candles) in sorted_data {
        if candles.is_empty() {
            continue;
        }

        let mut iter = candles.iter().peekable();
        let mut filled: Vec<Candle> = Vec::new();
        let mut start = None;

        for (i, &ts) in timestamps.iter().enumerate() {
            // Advance past any out-of-order stragglers
            while iter.peek().is_some_and(|c| c.datetime < ts) {
                iter.next();
            }

            if iter.peek().is_some_and(|c| c.datetime == ts) {
                filled.push(iter.next().unwrap().clone());
                start.get_or_insert(i);
            } else if let Some(last) = filled.last().cloned() {
                let mut gap_fill = last;
                gap_fill.datetime = ts;
                filled.push(gap_fill);
            }
        }

        if let Some(start) = start {
            aligned.push(AlignedSeries {
                symbol,
                candles: filled,
                start,
            });
        }
    }

    (timestamps, aligned)
}
