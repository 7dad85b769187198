//! Integration tests for the trading system
//!
//! Cross-module scenarios: sizing against the engine, lifecycle
//! invariants over price walks, portfolio guardrails, and backtest
//! reproducibility.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;

use tradebot::backtest::Backtester;
use tradebot::engine::{Engine, MarketSnapshot};
use tradebot::exchange::SimulatedExecutor;
use tradebot::sizing::{position_size, SizerParams};
use tradebot::strategies::{Strategy, StrategySignal};
use tradebot::{Candle, Config, ExitReason, MarketTick, SignalKind, Symbol};

// =============================================================================
// Test utilities
// =============================================================================

fn ts(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
}

/// Deterministic pseudo-random walk (no external RNG, reproducible)
struct Lcg(u64);

impl Lcg {
    fn next_unit(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        // Map the top bits into [-1, 1]
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

/// Random-walk candles around a base price
fn generate_walk_candles(count: usize, base_price: f64, volatility: f64, seed: u64) -> Vec<Candle> {
    let mut rng = Lcg(seed);
    let mut price = base_price;
    let mut candles = Vec::with_capacity(count);

    for i in 0..count {
        let change = rng.next_unit() * volatility;
        let open = price;
        price = (price + change).max(base_price * 0.2);
        let close = price;
        let high = open.max(close) + volatility * 0.3;
        let low = (open.min(close) - volatility * 0.3).max(base_price * 0.1);

        candles.push(Candle {
            datetime: ts(i as i64),
            open,
            high,
            low,
            close,
            volume: 1_000.0 + rng.next_unit().abs() * 500.0,
        });
    }

    candles
}

/// Cyclical trend so crossover strategies actually trade
fn generate_cyclical_candles(count: usize, base_price: f64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let close = base_price + (i as f64 / 8.0).sin() * 8.0 + i as f64 * 0.05;
            Candle {
                datetime: ts(i as i64),
                open: close - 0.2,
                high: close + 1.0,
                low: close - 1.2,
                close,
                volume: 1_000.0 + (i % 7) as f64 * 100.0,
            }
        })
        .collect()
}

/// Signals a buy on every tick; the gates decide what happens
struct AlwaysBuy;

impl Strategy for AlwaysBuy {
    fn name(&self) -> &'static str {
        "always_buy"
    }
    fn min_candles(&self) -> usize {
        0
    }
    fn evaluate(&self, _symbol: &Symbol, _candles: &[Candle]) -> Option<StrategySignal> {
        Some(StrategySignal::new(SignalKind::Buy, 1.0))
    }
}

fn zero_cost_config() -> Config {
    let mut cfg = Config::default();
    cfg.exchange.assumed_slippage = 0.0;
    cfg.exchange.taker_fee = 0.0;
    cfg.trading.initial_capital = 10_000.0;
    cfg.trading.risk_per_trade = 0.02;
    cfg
}

fn engine_with_always_buy(cfg: &Config) -> Engine {
    Engine::with_parts(
        cfg,
        Box::new(AlwaysBuy),
        Box::new(SimulatedExecutor::from_config(&cfg.exchange)),
    )
}

fn snapshot_at(hours: i64, tick: MarketTick) -> MarketSnapshot<'static> {
    MarketSnapshot {
        timestamp: ts(hours),
        tick,
        bid: None,
        ask: None,
        volume: 1_000.0,
        candles: &[],
    }
}

// =============================================================================
// Position sizing
// =============================================================================

#[test]
fn sizer_scenario_two_percent_risk() {
    // capital=10000, risk=2%, entry=50000, stop=49000 -> 0.2 base units
    let params = SizerParams {
        risk_per_trade: 0.02,
        max_exposure: 1.0,
        lot_size: 0.000001,
        min_notional: 10.0,
    };
    let size = position_size(10_000.0, 50_000.0, 49_000.0, 0.0, &params).unwrap();
    assert!((size - 0.2).abs() < 1e-6);
}

#[test]
fn sizer_risk_bound_over_stop_grid() {
    let params = SizerParams {
        risk_per_trade: 0.03,
        max_exposure: 1.0,
        lot_size: 0.000001,
        min_notional: 1.0,
    };
    let capital = 25_000.0;
    let entry = 40_000.0;

    for i in 1..40 {
        let stop = entry - i as f64 * 250.0;
        let size = position_size(capital, entry, stop, 0.0, &params).unwrap();
        let loss_at_stop = size * (entry - stop);
        assert!(
            loss_at_stop <= capital * params.risk_per_trade + 1e-6,
            "risk bound violated at stop {}",
            stop
        );
    }
}

// =============================================================================
// Lifecycle and engine invariants
// =============================================================================

#[test]
fn stop_priority_when_candle_touches_both_levels() {
    let mut cfg = zero_cost_config();
    cfg.trading.stop_loss_pct = 0.02; // 50_000 -> 49_000
    cfg.trading.take_profit_pct = 0.03; // 50_000 -> 51_500
    let mut engine = engine_with_always_buy(&cfg);
    let symbol = Symbol::new("BTCUSDT");

    engine
        .evaluate_tick(&symbol, &snapshot_at(0, MarketTick::from_last(50_000.0)))
        .unwrap();
    let opened = engine.book().get(&symbol).unwrap();
    assert!((opened.stop_loss - 49_000.0).abs() < 1e-6);
    assert!((opened.take_profit - 51_500.0).abs() < 1e-6);

    // One candle breaches both: worst-case execution takes the stop
    let both = MarketTick {
        last: 50_500.0,
        high: 52_000.0,
        low: 48_500.0,
    };
    let report = engine.evaluate_tick(&symbol, &snapshot_at(1, both)).unwrap();

    assert_eq!(report.closed.len(), 1);
    let trade = &report.closed[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.exit_price - 49_000.0).abs() < 1e-6);
}

#[test]
fn trailing_stop_monotonic_over_price_walk() {
    let mut cfg = zero_cost_config();
    cfg.trailing.enabled = true;
    cfg.trailing.activation_pct = 0.01;
    cfg.trailing.distance_pct = 0.01;
    cfg.trading.stop_loss_pct = 0.05;
    cfg.trading.take_profit_pct = 0.50; // keep the target out of the way
    let mut engine = engine_with_always_buy(&cfg);
    let symbol = Symbol::new("ETHUSDT");

    engine
        .evaluate_tick(&symbol, &snapshot_at(0, MarketTick::from_last(2_000.0)))
        .unwrap();

    let mut rng = Lcg(12345);
    let mut price = 2_000.0;
    let mut last_stop = engine.book().get(&symbol).unwrap().stop_loss;

    for hour in 1..200 {
        // Upward-biased walk so the trail arms and ratchets
        price = (price + rng.next_unit() * 10.0 + 1.5).max(1_950.0);
        let report = engine
            .evaluate_tick(&symbol, &snapshot_at(hour, MarketTick::from_last(price)))
            .unwrap();
        if !report.closed.is_empty() {
            break;
        }
        let stop = engine.book().get(&symbol).unwrap().stop_loss;
        assert!(
            stop >= last_stop,
            "trailing stop loosened: {} -> {}",
            last_stop,
            stop
        );
        last_stop = stop;
    }
}

#[test]
fn exposure_cap_holds_over_random_signals() {
    let mut cfg = zero_cost_config();
    cfg.trading.max_portfolio_exposure = 0.4;
    cfg.trading.max_positions = 4;
    cfg.trading.risk_per_trade = 0.08; // oversized so the cap binds
    cfg.trading.stop_loss_pct = 0.02;
    let mut engine = engine_with_always_buy(&cfg);

    let symbols: Vec<Symbol> = ["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT", "FUSDT"]
        .iter()
        .copied()
        .map(Symbol::new)
        .collect();

    let mut rng = Lcg(99);
    let mut prices: HashMap<Symbol, f64> = symbols.iter().map(|s| (s.clone(), 100.0)).collect();

    for hour in 0..300 {
        for symbol in &symbols {
            let price = prices.get_mut(symbol).unwrap();
            *price = (*price + rng.next_unit() * 3.0).max(20.0);

            let _ = engine.evaluate_tick(symbol, &snapshot_at(hour, MarketTick::from_last(*price)));

            // Checked after every tick: reserved notional within the cap,
            // position count within the limit
            let cap = cfg.trading.max_portfolio_exposure * engine.risk().capital();
            assert!(
                engine.book().open_notional() <= cap + 1e-6,
                "exposure cap exceeded at hour {}",
                hour
            );
            assert!(engine.book().len() <= cfg.trading.max_positions);
        }
    }
}

#[test]
fn kill_switch_sticky_until_reset() {
    let mut cfg = zero_cost_config();
    cfg.risk.max_drawdown = 0.03;
    cfg.trading.stop_loss_pct = 0.02;
    cfg.trading.risk_per_trade = 0.02;
    // Full exposure budget so every stop-out realizes the whole 2% risk
    cfg.trading.max_portfolio_exposure = 1.0;
    let mut engine = engine_with_always_buy(&cfg);
    let symbol = Symbol::new("BTCUSDT");

    // A declining market stops out each re-entry: two 2% losses push
    // drawdown past the 3% limit
    for (hour, price) in [50_000.0, 48_000.0, 46_000.0].into_iter().enumerate() {
        engine
            .evaluate_tick(
                &symbol,
                &snapshot_at(hour as i64, MarketTick::from_last(price)),
            )
            .unwrap();
    }
    assert!(engine.risk().is_halted());
    assert!(engine.book().is_empty());

    // Entries stay blocked through recovering prices
    for h in 3..8 {
        let report = engine
            .evaluate_tick(&symbol, &snapshot_at(h, MarketTick::from_last(50_000.0)))
            .unwrap();
        assert!(report.opened.is_none());
        let record = report.signal.unwrap();
        assert!(!record.taken);
    }

    // Capital has not recovered, so a reset alone re-arms the halt
    engine.risk_mut().reset_kill_switch();
    let report = engine
        .evaluate_tick(&symbol, &snapshot_at(9, MarketTick::from_last(50_000.0)))
        .unwrap();
    assert!(report.opened.is_none());
}

// =============================================================================
// Backtest reproducibility
// =============================================================================

fn backtest_config() -> Config {
    let mut cfg = Config::default();
    cfg.trading.pairs = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    cfg.trading.timeframe = "1h".to_string();
    cfg.strategy_name = "sma_cross".to_string();
    cfg.strategy = serde_json::json!({"short_period": 5, "long_period": 12});
    cfg.trailing.enabled = true;
    cfg
}

fn backtest_data() -> HashMap<Symbol, Vec<Candle>> {
    let mut data = HashMap::new();
    data.insert(Symbol::new("BTCUSDT"), generate_cyclical_candles(400, 100.0));
    data.insert(Symbol::new("ETHUSDT"), generate_cyclical_candles(400, 60.0));
    data
}

#[test]
fn backtest_produces_trades_on_cyclical_data() {
    let report = Backtester::new(backtest_config())
        .run(backtest_data())
        .unwrap();
    assert!(report.error.is_none());
    assert!(
        !report.trades.is_empty(),
        "crossover strategy should trade on cyclical data"
    );
    assert_eq!(report.equity_curve.len(), 400);

    // Exactly one exit reason per trade, and PnL reconciles with prices
    for trade in &report.trades {
        let expected =
            (trade.exit_price - trade.entry_price) * trade.amount * trade.side.sign();
        assert!((trade.pnl - expected).abs() < 1e-9);
        assert!((trade.net_pnl - (trade.pnl - trade.fees)).abs() < 1e-9);
    }
}

#[test]
fn backtest_replay_is_byte_identical() {
    let first = Backtester::new(backtest_config())
        .run(backtest_data())
        .unwrap();
    let second = Backtester::new(backtest_config())
        .run(backtest_data())
        .unwrap();

    let trades_a = serde_json::to_string(&first.trades).unwrap();
    let trades_b = serde_json::to_string(&second.trades).unwrap();
    assert_eq!(trades_a, trades_b);

    let curve_a = serde_json::to_string(&first.equity_curve).unwrap();
    let curve_b = serde_json::to_string(&second.equity_curve).unwrap();
    assert_eq!(curve_a, curve_b);

    assert_eq!(first.metrics.total_trades, second.metrics.total_trades);
    assert_eq!(first.metrics.sharpe_ratio, second.metrics.sharpe_ratio);
}

#[test]
fn backtest_capital_never_goes_negative() {
    let mut cfg = backtest_config();
    cfg.trading.risk_per_trade = 0.05;
    let mut data = HashMap::new();
    for (i, name) in ["AUSDT", "BUSDT", "CUSDT"].iter().enumerate() {
        data.insert(
            Symbol::new(*name),
            generate_walk_candles(500, 80.0 + i as f64 * 30.0, 2.5, 7 + i as u64),
        );
    }

    let report = Backtester::new(cfg).run(data).unwrap();
    for point in &report.equity_curve {
        assert!(point.equity > 0.0, "equity went non-positive");
    }
}

// =============================================================================
// Strategy smoke tests over generated data
// =============================================================================

#[test]
fn strategies_stay_quiet_with_insufficient_data() {
    let mut cfg = Config::default();
    let symbol = Symbol::new("BTCUSDT");
    let candles = generate_walk_candles(5, 100.0, 1.0, 1);

    for name in tradebot::strategies::available_strategies() {
        cfg.strategy_name = name.to_string();
        cfg.strategy = serde_json::json!({});
        let strategy = tradebot::strategies::create_strategy(&cfg).unwrap();
        assert!(
            strategy.evaluate(&symbol, &candles).is_none(),
            "{} signalled with 5 candles",
            name
        );
    }
}

#[test]
fn registered_strategies_run_over_long_series() {
    let mut cfg = Config::default();
    let symbol = Symbol::new("BTCUSDT");
    let candles = generate_cyclical_candles(300, 100.0);

    for name in tradebot::strategies::available_strategies() {
        cfg.strategy_name = name.to_string();
        cfg.strategy = serde_json::json!({});
        let strategy = tradebot::strategies::create_strategy(&cfg).unwrap();
        // Evaluating must not panic anywhere along the series
        for end in strategy.min_candles()..candles.len() {
            let _ = strategy.evaluate(&symbol, &candles[..end]);
        }
    }
}
