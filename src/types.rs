//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short; multiplies price deltas into PnL
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete signal emitted by a strategy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    Close,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Buy => "buy",
            SignalKind::Sell => "sell",
            SignalKind::Close => "close",
        }
    }

    /// Side a fresh position would take if the signal is acted on
    pub fn entry_side(&self) -> Option<Side> {
        match self {
            SignalKind::Buy => Some(Side::Long),
            SignalKind::Sell => Some(Side::Short),
            SignalKind::Close => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one strategy evaluation.
///
/// Every signal is recorded, including the ones that were not acted on;
/// `reject_reason` carries the gate or sizing error text in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub strategy: String,
    pub kind: SignalKind,
    pub price: f64,
    /// Confidence in 0..1
    pub strength: f64,
    pub taken: bool,
    pub reject_reason: Option<String>,
}

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Capital committed to a symbol.
///
/// `stop_loss` is ratcheted in place once trailing arms; `high_water`
/// is `Some` exactly while trailing is armed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: Symbol,
    pub strategy: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Base-currency units; > 0 while open
    pub amount: f64,
    /// Entry-leg commission, charged together with the exit leg at close
    pub entry_fee: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub high_water: Option<f64>,
    pub status: PositionStatus,
}

impl Position {
    /// Dollar value reserved against the exposure budget
    pub fn notional(&self) -> f64 {
        self.entry_price * self.amount
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) * self.amount * self.side.sign()
    }

    /// Unrealized PnL as a fraction of entry notional
    pub fn unrealized_pnl_pct(&self, current_price: f64) -> f64 {
        self.unrealized_pnl(current_price) / self.notional()
    }

    pub fn trailing_armed(&self) -> bool {
        self.high_water.is_some()
    }
}

/// Why a position left the book. Exactly one reason per closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Manual,
    Signal,
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Manual => "manual",
            ExitReason::Signal => "signal",
            ExitReason::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed trade record, frozen at position close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: u64,
    pub symbol: Symbol,
    pub strategy: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub amount: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Gross PnL before fees
    pub pnl: f64,
    /// Entry + exit commission
    pub fees: f64,
    pub net_pnl: f64,
    /// Net PnL as percent of entry notional
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn holding_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 3600.0
    }
}

/// One sample of the equity curve: capital plus marked-to-market open PnL
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Aggregate performance statistics over a closed-trade sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub win_rate_pct: f64,
    /// f64::INFINITY when there are winners and no losers
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_hours: f64,
    pub total_fees: f64,
    pub initial_capital: f64,
    pub final_capital: f64,
}

/// Price observation for one evaluation tick.
///
/// Live mode has only the latest trade price, so `high == low == last`;
/// the backtester passes the candle extremes for conservative stop and
/// take-profit touch detection.
#[derive(Debug, Clone, Copy)]
pub struct MarketTick {
    pub last: f64,
    pub high: f64,
    pub low: f64,
}

impl MarketTick {
    pub fn from_last(last: f64) -> Self {
        MarketTick {
            last,
            high: last,
            low: last,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.last, self.high, self.low]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
    }
}
