//! Evaluation engine
//!
//! One pipeline for both live trading and backtesting:
//! lifecycle-tick open positions, evaluate the strategy, gate through
//! the circuit breaker and risk governor, size, execute, mutate. All
//! account state lives behind `&mut self`, so mutation is serialized by
//! construction and two symbols can never jointly exceed the exposure
//! cap within a tick.
//!
//! The engine never reads the wall clock; timestamps come from the
//! snapshots, which keeps backtests bit-for-bit reproducible.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{Config, TrailingConfig};
use crate::error::TradeError;
use crate::exchange::{OrderExecutor, OrderSide, SimulatedExecutor};
use crate::position::PositionBook;
use crate::risk::RiskManager;
use crate::sizing::{self, SizerParams};
use crate::strategies::{self, Strategy};
use crate::{
    Candle, ExitReason, MarketTick, Position, Side, SignalKind, SignalRecord, Symbol, Trade,
};

/// Market state handed to one evaluation tick
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot<'a> {
    pub timestamp: DateTime<Utc>,
    pub tick: MarketTick,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: f64,
    /// Candle history up to and including this tick
    pub candles: &'a [Candle],
}

/// Everything that happened during one tick for one symbol
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub signal: Option<SignalRecord>,
    pub opened: Option<Position>,
    pub closed: Vec<Trade>,
}

/// The trading engine: strategy + governor + sizer + lifecycle
pub struct Engine {
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    breaker: CircuitBreaker,
    book: PositionBook,
    executor: Box<dyn OrderExecutor>,
    sizer: SizerParams,
    trailing: TrailingConfig,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    max_hold_hours: u64,
    pending_closes: HashMap<Symbol, ExitReason>,
    last_prices: HashMap<Symbol, f64>,
}

impl Engine {
    /// Build from configuration with simulated execution
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let strategy = strategies::create_strategy(config)?;
        let executor = Box::new(SimulatedExecutor::from_config(&config.exchange));
        Ok(Engine::with_parts(config, strategy, executor))
    }

    /// Build with explicit strategy and executor (tests, custom wiring)
    pub fn with_parts(
        config: &Config,
        strategy: Box<dyn Strategy>,
        executor: Box<dyn OrderExecutor>,
    ) -> Self {
        Engine {
            strategy,
            risk: RiskManager::from_config(config),
            breaker: CircuitBreaker::new(config.risk.circuit_breaker.clone()),
            book: PositionBook::new(),
            executor,
            sizer: SizerParams::from_config(config),
            trailing: config.trailing.clone(),
            stop_loss_pct: config.trading.stop_loss_pct,
            take_profit_pct: config.trading.take_profit_pct,
            max_hold_hours: config.trading.max_hold_hours,
            pending_closes: HashMap::new(),
            last_prices: HashMap::new(),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Candle history the strategy needs before it can signal
    pub fn min_candles(&self) -> usize {
        self.strategy.min_candles()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Realized capital plus open PnL marked at the latest seen prices
    pub fn equity(&self) -> f64 {
        let open_pnl: f64 = self
            .book
            .iter()
            .map(|(symbol, pos)| {
                let price = self
                    .last_prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(pos.entry_price);
                pos.unrealized_pnl(price)
            })
            .sum();
        self.risk.capital() + open_pnl
    }

    /// Restore a position recovered from persistence (crash recovery)
    pub fn restore_position(&mut self, position: Position) {
        self.last_prices
            .insert(position.symbol.clone(), position.entry_price);
        self.book.restore(position);
    }

    /// Ask for a manual close; honored on the symbol's next tick, after
    /// stop and take-profit checks.
    pub fn request_close(&mut self, symbol: &Symbol) {
        self.pending_closes.insert(symbol.clone(), ExitReason::Manual);
    }

    /// Close every open position at its last seen price (shutdown,
    /// end of backtest). Reason is `manual`.
    pub fn close_all(&mut self, timestamp: DateTime<Utc>) -> Vec<Trade> {
        let mut trades = Vec::new();
        for symbol in self.book.symbols() {
            let price = match self.last_prices.get(&symbol) {
                Some(&p) => p,
                None => continue,
            };
            match self.execute_close(&symbol, price, timestamp, ExitReason::Manual) {
                Ok(trade) => trades.push(trade),
                Err(e) => tracing::error!("Failed to liquidate {}: {}", symbol, e),
            }
        }
        trades
    }

    /// Run one full evaluation tick for a symbol.
    ///
    /// An invalid price rejects the whole tick and leaves every position
    /// unchanged; the caller logs and retries next interval.
    pub fn evaluate_tick(
        &mut self,
        symbol: &Symbol,
        snap: &MarketSnapshot,
    ) -> Result<TickReport, TradeError> {
        if !snap.tick.is_valid() {
            return Err(TradeError::InvalidMarketPrice(snap.tick.last));
        }
        self.last_prices.insert(symbol.clone(), snap.tick.last);

        let mut report = TickReport::default();

        // Phase 1: lifecycle for an open position
        let mut pending = self.pending_closes.remove(symbol);
        let trigger = match self.book.get_mut(symbol) {
            Some(pos) => {
                pos.update_trailing_stop(snap.tick.last, &self.trailing);
                pos.check_exit(&snap.tick, pending.take(), snap.timestamp, self.max_hold_hours)
            }
            None => None,
        };
        if let Some(trigger) = trigger {
            match self.execute_close(symbol, trigger.price, snap.timestamp, trigger.reason) {
                Ok(trade) => report.closed.push(trade),
                Err(e) => tracing::error!("Failed to close {}: {}", symbol, e),
            }
        }

        // Phase 2: evaluate the strategy
        let Some(signal) = self.strategy.evaluate(symbol, snap.candles) else {
            return Ok(report);
        };
        let mut record = SignalRecord {
            timestamp: snap.timestamp,
            symbol: symbol.clone(),
            strategy: self.strategy.name().to_string(),
            kind: signal.kind,
            price: snap.tick.last,
            strength: signal.strength,
            taken: false,
            reject_reason: None,
        };

        // Phase 3a: signal against an open position -> close or ignore
        if let Some(pos) = self.book.get(symbol) {
            let reverses = signal
                .kind
                .entry_side()
                .map(|side| side != pos.side)
                .unwrap_or(false);
            if signal.kind == SignalKind::Close || reverses {
                match self.execute_close(symbol, snap.tick.last, snap.timestamp, ExitReason::Signal)
                {
                    Ok(trade) => {
                        record.taken = true;
                        report.closed.push(trade);
                    }
                    Err(e) => record.reject_reason = Some(e),
                }
            } else {
                record.reject_reason = Some("position already open".to_string());
            }
            report.signal = Some(record);
            return Ok(report);
        }

        // Phase 3b: flat book -> gate, size, execute
        let Some(side) = signal.kind.entry_side() else {
            record.reject_reason = Some("no position to close".to_string());
            report.signal = Some(record);
            return Ok(report);
        };

        if let Some(reason) =
            self.breaker
                .evaluate(symbol, snap.candles, snap.volume, snap.bid, snap.ask)
        {
            record.reject_reason = Some(format!("circuit breaker: {}", reason));
        } else if let Err(e) = self.risk.ensure_can_open(self.book.len()) {
            record.reject_reason = Some(e.to_string());
        } else {
            match self.try_open(symbol, side, snap) {
                Ok(position) => {
                    record.taken = true;
                    report.opened = Some(position);
                }
                Err(reason) => record.reject_reason = Some(reason),
            }
        }

        report.signal = Some(record);
        Ok(report)
    }

    /// Size and open a position; the error string becomes the signal's
    /// reject reason.
    fn try_open(
        &mut self,
        symbol: &Symbol,
        side: Side,
        snap: &MarketSnapshot,
    ) -> Result<Position, String> {
        // Sizing keys off the signal reference price; protective levels
        // anchor at the actual fill below.
        let reference = snap.tick.last;
        let stop_ref = protective_stop(reference, side, self.stop_loss_pct);

        let amount = sizing::position_size(
            self.risk.capital(),
            reference,
            stop_ref,
            self.book.open_notional(),
            &self.sizer,
        )
        .map_err(|e| e.to_string())?;

        let order_side = match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        };
        let fill = self
            .executor
            .place_order(symbol, order_side, amount, reference)
            .map_err(|e| format!("order failed: {}", e))?;

        let stop_loss = protective_stop(fill.price, side, self.stop_loss_pct);
        let take_profit = match side {
            Side::Long => fill.price * (1.0 + self.take_profit_pct),
            Side::Short => fill.price * (1.0 - self.take_profit_pct),
        };

        let position = self
            .book
            .open(
                symbol.clone(),
                self.strategy.name().to_string(),
                side,
                fill.price,
                snap.timestamp,
                amount,
                fill.fee,
                stop_loss,
                take_profit,
            )
            .clone();

        tracing::info!(
            "OPEN {} {} {:.6} @ {:.2} | SL {:.2} TP {:.2}",
            position.side,
            symbol,
            amount,
            fill.price,
            stop_loss,
            take_profit
        );
        Ok(position)
    }

    fn execute_close(
        &mut self,
        symbol: &Symbol,
        exit_level: f64,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Trade, String> {
        let (order_side, amount) = match self.book.get(symbol) {
            Some(pos) => (
                match pos.side {
                    Side::Long => OrderSide::Sell,
                    Side::Short => OrderSide::Buy,
                },
                pos.amount,
            ),
            None => return Err("no open position".to_string()),
        };

        let fill = self
            .executor
            .place_order(symbol, order_side, amount, exit_level)
            .map_err(|e| format!("order failed: {}", e))?;

        let Some(trade) = self
            .book
            .close(symbol, fill.price, exit_time, fill.fee, reason)
        else {
            return Err("no open position".to_string());
        };

        self.risk.apply_trade(trade.net_pnl);

        tracing::info!(
            "CLOSE {} {} {:.6} @ {:.2} | {} | net {:+.2}",
            trade.side,
            symbol,
            trade.amount,
            trade.exit_price,
            trade.exit_reason,
            trade.net_pnl
        );
        Ok(trade)
    }
}

fn protective_stop(price: f64, side: Side, stop_pct: f64) -> f64 {
    match side {
        Side::Long => price * (1.0 - stop_pct),
        Side::Short => price * (1.0 + stop_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::StrategySignal;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    /// Emits the same signal every tick
    struct FixedStrategy(Option<StrategySignal>);

    impl Strategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn min_candles(&self) -> usize {
            0
        }
        fn evaluate(&self, _symbol: &Symbol, _candles: &[Candle]) -> Option<StrategySignal> {
            self.0
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::default();
        // Zero-cost fills keep the arithmetic exact
        cfg.exchange.assumed_slippage = 0.0;
        cfg.exchange.taker_fee = 0.0;
        cfg.trading.initial_capital = 10_000.0;
        cfg.trading.risk_per_trade = 0.02;
        cfg.trading.max_portfolio_exposure = 1.0;
        cfg.trading.stop_loss_pct = 0.02;
        cfg.trading.take_profit_pct = 0.04;
        cfg
    }

    fn engine_with(signal: Option<StrategySignal>, cfg: &Config) -> Engine {
        Engine::with_parts(
            cfg,
            Box::new(FixedStrategy(signal)),
            Box::new(SimulatedExecutor::from_config(&cfg.exchange)),
        )
    }

    fn snapshot(ts_hour: u32, tick: MarketTick) -> MarketSnapshot<'static> {
        MarketSnapshot {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, ts_hour, 0, 0).unwrap(),
            tick,
            bid: None,
            ask: None,
            volume: 1_000.0,
            candles: &[],
        }
    }

    #[test]
    fn buy_signal_opens_sized_position() {
        let cfg = test_config();
        let mut engine = engine_with(
            Some(StrategySignal::new(SignalKind::Buy, 0.8)),
            &cfg,
        );
        let symbol = Symbol::new("BTCUSDT");

        let report = engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();

        let opened = report.opened.unwrap();
        // risk 200 over a 1000 stop distance
        assert_relative_eq!(opened.amount, 0.2, max_relative = 1e-6);
        assert_relative_eq!(opened.stop_loss, 49_000.0, max_relative = 1e-9);
        assert_relative_eq!(opened.take_profit, 52_000.0, max_relative = 1e-9);
        assert!(report.signal.unwrap().taken);
        assert_eq!(engine.book().len(), 1);
    }

    #[test]
    fn stop_breach_closes_and_realizes_loss() {
        let cfg = test_config();
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");

        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();
        let report = engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(48_500.0)))
            .unwrap();

        assert_eq!(report.closed.len(), 1);
        let trade = &report.closed[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.exit_price, 49_000.0, max_relative = 1e-9);
        // Lost exactly the risk budget: 0.2 * 1000 = 200
        assert_relative_eq!(engine.risk().capital(), 9_800.0, max_relative = 1e-9);
    }

    #[test]
    fn invalid_price_rejects_tick_and_preserves_position() {
        let cfg = test_config();
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");

        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();

        let err = engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(f64::NAN)))
            .unwrap_err();
        assert!(matches!(err, TradeError::InvalidMarketPrice(_)));
        assert_eq!(engine.book().len(), 1);
    }

    #[test]
    fn opposite_signal_closes_with_signal_reason() {
        let cfg = test_config();
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");
        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();

        // Swap in a sell strategy mid-flight
        engine.strategy = Box::new(FixedStrategy(Some(StrategySignal::new(
            SignalKind::Sell,
            0.8,
        ))));
        let report = engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(50_500.0)))
            .unwrap();

        // The sell closes the long; the signal phase ends the tick, so
        // no short is opened on the same evaluation.
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].exit_reason, ExitReason::Signal);
        assert!(engine.book().is_empty());
    }

    #[test]
    fn same_direction_signal_is_recorded_not_taken() {
        let cfg = test_config();
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");
        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();

        let report = engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(50_100.0)))
            .unwrap();
        let record = report.signal.unwrap();
        assert!(!record.taken);
        assert!(record.reject_reason.unwrap().contains("already open"));
    }

    #[test]
    fn halted_engine_rejects_new_entries_but_manages_positions() {
        let mut cfg = test_config();
        cfg.risk.max_drawdown = 0.01;
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");

        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();
        // Stop out: -2% of capital trips the 1% drawdown kill switch
        engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(48_000.0)))
            .unwrap();
        assert!(engine.risk().is_halted());

        let report = engine
            .evaluate_tick(&symbol, &snapshot(2, MarketTick::from_last(50_000.0)))
            .unwrap();
        let record = report.signal.unwrap();
        assert!(!record.taken);
        assert!(record.reject_reason.unwrap().contains("halted"));
        assert!(engine.book().is_empty());
    }

    #[test]
    fn exposure_budget_shrinks_across_symbols() {
        let mut cfg = test_config();
        cfg.trading.max_portfolio_exposure = 0.5;
        cfg.trading.risk_per_trade = 0.10; // oversized on purpose
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);

        for name in ["AUSDT", "BUSDT", "CUSDT"] {
            let _ = engine
                .evaluate_tick(&Symbol::new(name), &snapshot(0, MarketTick::from_last(100.0)))
                .unwrap();
        }

        let cap = cfg.trading.max_portfolio_exposure * engine.risk().capital();
        assert!(engine.book().open_notional() <= cap + 1e-9);
    }

    #[test]
    fn manual_close_request_honored_next_tick() {
        let cfg = test_config();
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        let symbol = Symbol::new("BTCUSDT");
        engine
            .evaluate_tick(&symbol, &snapshot(0, MarketTick::from_last(50_000.0)))
            .unwrap();

        engine.request_close(&symbol);
        // Drop the strategy signal so nothing else interferes
        engine.strategy = Box::new(FixedStrategy(None));
        let report = engine
            .evaluate_tick(&symbol, &snapshot(1, MarketTick::from_last(50_200.0)))
            .unwrap();

        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].exit_reason, ExitReason::Manual);
    }

    #[test]
    fn close_all_liquidates_with_manual_reason() {
        let mut cfg = test_config();
        // Keep each position at 25% notional so both symbols fit
        cfg.trading.risk_per_trade = 0.005;
        let mut engine = engine_with(Some(StrategySignal::new(SignalKind::Buy, 0.8)), &cfg);
        for name in ["AUSDT", "BUSDT"] {
            engine
                .evaluate_tick(&Symbol::new(name), &snapshot(0, MarketTick::from_last(100.0)))
                .unwrap();
        }
        assert_eq!(engine.book().len(), 2);

        let trades = engine.close_all(Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap());
        assert_eq!(trades.len(), 2);
        assert!(trades.iter().all(|t| t.exit_reason == ExitReason::Manual));
        assert!(engine.book().is_empty());
    }
}
