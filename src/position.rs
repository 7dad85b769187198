//! Position lifecycle management
//!
//! A position moves OPEN -> CLOSED exactly once. Each evaluation tick
//! first ratchets the trailing stop (when enabled), then checks exit
//! conditions in fixed priority order:
//!
//! 1. stop-loss breach (reported as `trailing_stop` once the trail armed)
//! 2. take-profit breach
//! 3. external manual/signal close
//! 4. timeout (position age over the configured maximum)
//!
//! Only the first matching condition fires per tick. Stop and take-profit
//! exits fill at their level; the other exits fill at the last price.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::config::TrailingConfig;
use crate::{ExitReason, MarketTick, Position, PositionStatus, Side, Symbol, Trade};

/// Exit condition matched during a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitTrigger {
    pub reason: ExitReason,
    pub price: f64,
}

impl Position {
    /// Ratchet the trailing stop against the latest price.
    ///
    /// Arms once unrealized profit reaches the activation threshold, then
    /// tracks a high-water mark (low-water for shorts) and recomputes the
    /// stop at the callback distance from it. The stop only ever
    /// tightens; a candidate looser than the current stop is discarded.
    /// Returns true when the stop actually moved.
    pub fn update_trailing_stop(&mut self, price: f64, cfg: &TrailingConfig) -> bool {
        if !cfg.enabled {
            return false;
        }

        match self.high_water {
            None => {
                if self.unrealized_pnl_pct(price) < cfg.activation_pct {
                    return false;
                }
                self.high_water = Some(price);
                self.tighten_stop(self.trail_level(price, cfg))
            }
            Some(hw) => {
                let new_hw = match self.side {
                    Side::Long => hw.max(price),
                    Side::Short => hw.min(price),
                };
                if new_hw == hw {
                    return false;
                }
                self.high_water = Some(new_hw);
                self.tighten_stop(self.trail_level(new_hw, cfg))
            }
        }
    }

    fn trail_level(&self, high_water: f64, cfg: &TrailingConfig) -> f64 {
        match self.side {
            Side::Long => high_water * (1.0 - cfg.distance_pct),
            Side::Short => high_water * (1.0 + cfg.distance_pct),
        }
    }

    /// Move the stop to `candidate` only if that is tighter
    fn tighten_stop(&mut self, candidate: f64) -> bool {
        let tighter = match self.side {
            Side::Long => candidate > self.stop_loss,
            Side::Short => candidate < self.stop_loss,
        };
        if tighter {
            self.stop_loss = candidate;
        }
        tighter
    }

    /// Evaluate exit conditions for this tick.
    ///
    /// The backtester passes candle extremes in `tick`, so a stop and a
    /// take-profit touched inside the same candle resolve to the stop
    /// (worst-case execution). Live ticks have `high == low == last`.
    pub fn check_exit(
        &self,
        tick: &MarketTick,
        close_request: Option<ExitReason>,
        now: DateTime<Utc>,
        max_hold_hours: u64,
    ) -> Option<ExitTrigger> {
        let stop_hit = match self.side {
            Side::Long => tick.low <= self.stop_loss,
            Side::Short => tick.high >= self.stop_loss,
        };
        if stop_hit {
            let reason = if self.trailing_armed() {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return Some(ExitTrigger {
                reason,
                price: self.stop_loss,
            });
        }

        let target_hit = match self.side {
            Side::Long => tick.high >= self.take_profit,
            Side::Short => tick.low <= self.take_profit,
        };
        if target_hit {
            return Some(ExitTrigger {
                reason: ExitReason::TakeProfit,
                price: self.take_profit,
            });
        }

        if let Some(reason) = close_request {
            return Some(ExitTrigger {
                reason,
                price: tick.last,
            });
        }

        if max_hold_hours > 0 && now - self.entry_time >= Duration::hours(max_hold_hours as i64) {
            return Some(ExitTrigger {
                reason: ExitReason::Timeout,
                price: tick.last,
            });
        }

        None
    }
}

/// Open positions, one per symbol.
///
/// `BTreeMap` keeps iteration order deterministic, which the backtester
/// relies on for reproducible runs.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: BTreeMap<Symbol, Position>,
    next_id: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        PositionBook {
            positions: BTreeMap::new(),
            next_id: 1,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        symbol: Symbol,
        strategy: String,
        side: Side,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        amount: f64,
        entry_fee: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> &Position {
        debug_assert!(amount > 0.0);
        let id = self.next_id;
        self.next_id += 1;

        let position = Position {
            id,
            symbol: symbol.clone(),
            strategy,
            side,
            entry_price,
            entry_time,
            amount,
            entry_fee,
            stop_loss,
            take_profit,
            high_water: None,
            status: PositionStatus::Open,
        };
        self.positions.insert(symbol.clone(), position);
        &self.positions[&symbol]
    }

    /// Re-insert a position recovered from persistence, keeping the id
    /// sequence ahead of it
    pub fn restore(&mut self, position: Position) {
        self.next_id = self.next_id.max(position.id + 1);
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Close the symbol's position, freezing an immutable trade record.
    /// Realized PnL reconciles entry/exit price, amount, and side; the
    /// entry-leg fee deferred at open is charged here with the exit leg.
    pub fn close(
        &mut self,
        symbol: &Symbol,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_fee: f64,
        reason: ExitReason,
    ) -> Option<Trade> {
        let mut position = self.positions.remove(symbol)?;
        position.status = PositionStatus::Closed;

        let pnl = (exit_price - position.entry_price) * position.amount * position.side.sign();
        let fees = position.entry_fee + exit_fee;
        let net_pnl = pnl - fees;
        let pnl_pct = net_pnl / position.notional() * 100.0;

        Some(Trade {
            position_id: position.id,
            symbol: position.symbol,
            strategy: position.strategy,
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            amount: position.amount,
            entry_time: position.entry_time,
            exit_time,
            pnl,
            fees,
            net_pnl,
            pnl_pct,
            exit_reason: reason,
        })
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &Symbol) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Symbols with open positions, in deterministic order
    pub fn symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Position)> {
        self.positions.iter()
    }

    /// Sum of entry notional across open positions (the reserved budget)
    pub fn open_notional(&self) -> f64 {
        self.positions.values().map(|p| p.notional()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailing_cfg() -> TrailingConfig {
        TrailingConfig {
            enabled: true,
            activation_pct: 0.015,
            distance_pct: 0.008,
        }
    }

    fn long_position() -> Position {
        Position {
            id: 1,
            symbol: Symbol::new("BTCUSDT"),
            strategy: "sma_cross".to_string(),
            side: Side::Long,
            entry_price: 100.0,
            entry_time: Utc::now(),
            amount: 1.0,
            entry_fee: 0.0,
            stop_loss: 98.0,
            take_profit: 104.0,
            high_water: None,
            status: PositionStatus::Open,
        }
    }

    #[test]
    fn trailing_does_not_arm_below_activation() {
        let mut pos = long_position();
        assert!(!pos.update_trailing_stop(101.0, &trailing_cfg()));
        assert!(pos.high_water.is_none());
        assert_eq!(pos.stop_loss, 98.0);
    }

    #[test]
    fn trailing_arms_and_ratchets_up() {
        let mut pos = long_position();
        let cfg = trailing_cfg();

        assert!(pos.update_trailing_stop(102.0, &cfg)); // +2% arms
        let first_stop = pos.stop_loss;
        assert!(first_stop > 98.0);

        assert!(pos.update_trailing_stop(105.0, &cfg));
        assert!(pos.stop_loss > first_stop);
    }

    #[test]
    fn trailing_stop_never_loosens() {
        let mut pos = long_position();
        let cfg = trailing_cfg();
        let mut last_stop = pos.stop_loss;

        for price in [102.0, 105.0, 103.0, 101.0, 106.0, 104.0] {
            pos.update_trailing_stop(price, &cfg);
            assert!(pos.stop_loss >= last_stop, "stop loosened at {}", price);
            last_stop = pos.stop_loss;
        }
    }

    #[test]
    fn short_trailing_ratchets_down() {
        let mut pos = long_position();
        pos.side = Side::Short;
        pos.stop_loss = 102.0;
        pos.take_profit = 96.0;
        let cfg = trailing_cfg();

        assert!(pos.update_trailing_stop(98.0, &cfg)); // +2% for a short
        let first_stop = pos.stop_loss;
        assert!(first_stop < 102.0);

        assert!(pos.update_trailing_stop(97.0, &cfg));
        assert!(pos.stop_loss < first_stop);

        // Pullback must not loosen
        let stop_before = pos.stop_loss;
        pos.update_trailing_stop(99.0, &cfg);
        assert_eq!(pos.stop_loss, stop_before);
    }

    #[test]
    fn stop_breach_takes_priority_over_target() {
        let pos = long_position();
        // Candle touches both stop (98) and target (104)
        let tick = MarketTick {
            last: 100.0,
            high: 105.0,
            low: 97.0,
        };
        let exit = pos.check_exit(&tick, None, Utc::now(), 0).unwrap();
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.price, 98.0);
    }

    #[test]
    fn target_exit_fills_at_level() {
        let pos = long_position();
        let tick = MarketTick {
            last: 103.0,
            high: 104.5,
            low: 101.0,
        };
        let exit = pos.check_exit(&tick, None, Utc::now(), 0).unwrap();
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert_eq!(exit.price, 104.0);
    }

    #[test]
    fn armed_trailing_reports_trailing_stop_reason() {
        let mut pos = long_position();
        pos.update_trailing_stop(103.0, &trailing_cfg());
        assert!(pos.trailing_armed());

        let tick = MarketTick::from_last(pos.stop_loss - 0.01);
        let exit = pos.check_exit(&tick, None, Utc::now(), 0).unwrap();
        assert_eq!(exit.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn signal_close_only_fires_without_breaches() {
        let pos = long_position();
        let tick = MarketTick::from_last(101.0);
        let exit = pos
            .check_exit(&tick, Some(ExitReason::Signal), Utc::now(), 0)
            .unwrap();
        assert_eq!(exit.reason, ExitReason::Signal);
        assert_eq!(exit.price, 101.0);
    }

    #[test]
    fn timeout_closes_aged_position() {
        let mut pos = long_position();
        pos.entry_time = Utc::now() - Duration::hours(49);
        let tick = MarketTick::from_last(101.0);

        assert!(pos.check_exit(&tick, None, Utc::now(), 0).is_none());
        let exit = pos.check_exit(&tick, None, Utc::now(), 48).unwrap();
        assert_eq!(exit.reason, ExitReason::Timeout);
    }

    #[test]
    fn short_exit_checks_are_inverted() {
        let mut pos = long_position();
        pos.side = Side::Short;
        pos.stop_loss = 102.0;
        pos.take_profit = 96.0;

        let stop_tick = MarketTick {
            last: 101.0,
            high: 102.5,
            low: 100.0,
        };
        assert_eq!(
            pos.check_exit(&stop_tick, None, Utc::now(), 0).unwrap().reason,
            ExitReason::StopLoss
        );

        let target_tick = MarketTick {
            last: 97.0,
            high: 98.0,
            low: 95.5,
        };
        assert_eq!(
            pos.check_exit(&target_tick, None, Utc::now(), 0).unwrap().reason,
            ExitReason::TakeProfit
        );
    }

    #[test]
    fn book_close_reconciles_pnl() {
        let mut book = PositionBook::new();
        let symbol = Symbol::new("BTCUSDT");
        book.open(
            symbol.clone(),
            "sma_cross".to_string(),
            Side::Long,
            100.0,
            Utc::now(),
            2.0,
            0.2,
            98.0,
            104.0,
        );
        assert_eq!(book.open_notional(), 200.0);

        let trade = book
            .close(&symbol, 104.0, Utc::now(), 0.208, ExitReason::TakeProfit)
            .unwrap();
        assert_eq!(trade.pnl, 8.0);
        assert!((trade.net_pnl - (8.0 - 0.408)).abs() < 1e-12);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!(book.is_empty());
    }

    #[test]
    fn book_assigns_sequential_ids() {
        let mut book = PositionBook::new();
        let a = book
            .open(
                Symbol::new("A"),
                "s".into(),
                Side::Long,
                10.0,
                Utc::now(),
                1.0,
                0.0,
                9.0,
                12.0,
            )
            .id;
        let b = book
            .open(
                Symbol::new("B"),
                "s".into(),
                Side::Long,
                10.0,
                Utc::now(),
                1.0,
                0.0,
                9.0,
                12.0,
            )
            .id;
        assert_eq!(b, a + 1);
    }
}
