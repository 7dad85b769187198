//! Performance metrics
//!
//! Pure functions from (closed trades, equity curve, initial capital)
//! to aggregate statistics. Every ratio degrades to 0 instead of
//! dividing by zero; profit factor reports `f64::INFINITY` for a
//! loss-free record with at least one winner.

use itertools::Itertools;
use statrs::statistics::Statistics;

use crate::{EquityPoint, PerformanceMetrics, Trade};

/// Annualization factor for a candle timeframe. Crypto trades around
/// the clock, so a year is 365 full days.
pub fn periods_per_year(timeframe: &str) -> f64 {
    const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

    let minutes = parse_timeframe_minutes(timeframe).unwrap_or(60.0);
    MINUTES_PER_YEAR / minutes
}

fn parse_timeframe_minutes(timeframe: &str) -> Option<f64> {
    let timeframe = timeframe.trim();
    let (value, unit) = timeframe.split_at(timeframe.len().checked_sub(1)?);
    let value: f64 = value.parse().ok().filter(|v| *v > 0.0)?;
    match unit {
        "m" => Some(value),
        "h" => Some(value * 60.0),
        "d" => Some(value * 1_440.0),
        "w" => Some(value * 10_080.0),
        _ => None,
    }
}

/// Compute aggregate statistics for a finished run.
///
/// `risk_free_rate` is annual; `periods_per_year` matches the equity
/// curve's sampling interval (see [`periods_per_year`]).
pub fn calculate(
    trades: &[Trade],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
    risk_free_rate: f64,
    periods_per_year: f64,
) -> PerformanceMetrics {
    let final_capital = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(initial_capital);

    let mut m = PerformanceMetrics {
        initial_capital,
        final_capital,
        total_trades: trades.len(),
        ..Default::default()
    };

    if initial_capital > 0.0 {
        m.total_return_pct = (final_capital - initial_capital) / initial_capital * 100.0;
    }

    // ---- trade statistics ----------------------------------------------
    let winners: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl > 0.0).collect();
    let losers: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl < 0.0).collect();
    m.winning_trades = winners.len();
    m.losing_trades = losers.len();

    if !trades.is_empty() {
        m.win_rate_pct = winners.len() as f64 / trades.len() as f64 * 100.0;
        m.avg_holding_hours =
            trades.iter().map(|t| t.holding_hours()).sum::<f64>() / trades.len() as f64;
    }
    m.total_fees = trades.iter().map(|t| t.fees).sum();

    m.gross_profit = winners.iter().map(|t| t.net_pnl).sum();
    m.gross_loss = losers.iter().map(|t| t.net_pnl.abs()).sum();

    m.profit_factor = if m.gross_loss > 0.0 {
        m.gross_profit / m.gross_loss
    } else if m.gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    if !winners.is_empty() {
        m.avg_win = m.gross_profit / winners.len() as f64;
        m.largest_win = winners.iter().map(|t| t.net_pnl).fold(f64::MIN, f64::max);
    }
    if !losers.is_empty() {
        m.avg_loss = losers.iter().map(|t| t.net_pnl).sum::<f64>() / losers.len() as f64;
        m.largest_loss = losers.iter().map(|t| t.net_pnl).fold(f64::MAX, f64::min);
    }

    let (max_wins, max_losses) = streaks(trades);
    m.max_consecutive_wins = max_wins;
    m.max_consecutive_losses = max_losses;

    // ---- equity-curve statistics ---------------------------------------
    if equity_curve.len() < 2 {
        return m;
    }

    m.max_drawdown_pct = max_drawdown(equity_curve) * 100.0;

    let duration_days = (equity_curve.last().unwrap().timestamp
        - equity_curve.first().unwrap().timestamp)
        .num_seconds() as f64
        / 86_400.0;
    let duration_years = duration_days / 365.0;
    if duration_years > 0.0 && initial_capital > 0.0 && final_capital > 0.0 {
        m.annualized_return_pct =
            ((final_capital / initial_capital).powf(1.0 / duration_years) - 1.0) * 100.0;
    }

    let returns: Vec<f64> = equity_curve
        .iter()
        .map(|p| p.equity)
        .tuple_windows()
        .filter(|(prev, _)| *prev > 0.0)
        .map(|(prev, next)| (next - prev) / prev)
        .collect();

    if returns.len() >= 2 {
        let rf_per_period = risk_free_rate / periods_per_year;
        let mean = returns.iter().mean();
        let excess = mean - rf_per_period;

        let std_dev = returns.iter().std_dev();
        if std_dev > 0.0 {
            m.sharpe_ratio = excess / std_dev * periods_per_year.sqrt();
        }

        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.len() >= 2 {
            let downside_dev = downside.iter().std_dev();
            if downside_dev > 0.0 {
                m.sortino_ratio = excess / downside_dev * periods_per_year.sqrt();
            }
        }
    }

    if m.max_drawdown_pct > 0.0 {
        m.calmar_ratio = m.annualized_return_pct / m.max_drawdown_pct;
    }

    m
}

/// Largest peak-to-trough decline over the curve, as a fraction
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }
    max_dd
}

/// Longest win and loss streaks, in trade order
fn streaks(trades: &[Trade]) -> (usize, usize) {
    let mut max_wins = 0;
    let mut max_losses = 0;
    let mut wins = 0;
    let mut losses = 0;

    for trade in trades {
        if trade.net_pnl > 0.0 {
            wins += 1;
            losses = 0;
        } else if trade.net_pnl < 0.0 {
            losses += 1;
            wins = 0;
        } else {
            wins = 0;
            losses = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }

    (max_wins, max_losses)
}
