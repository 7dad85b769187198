//! SQLite persistence
//!
//! Trades, position snapshots, the signal audit trail, daily
//! performance snapshots, and live-loop checkpoints. WAL mode so the
//! dashboard (or anything else) can read while the bot writes.
//!
//! Persistence is fire-and-forget from the engine's point of view: the
//! live loop logs failures and keeps trading.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::{
    ExitReason, PerformanceMetrics, Position, PositionStatus, Side, SignalRecord, Symbol, Trade,
};

/// Snapshot of the live loop, written once per cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub timestamp: String,
    pub cycle_count: i64,
    pub capital: f64,
    pub peak_capital: f64,
    pub equity: f64,
    pub open_positions: i64,
    pub drawdown_pct: f64,
    pub consecutive_losses: i64,
    pub halted: bool,
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database under `state_dir`
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        let db_path = state_dir.join("tradebot.db");

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!("SQLite store ready at {}", db_path.display());
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                amount REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                pnl REAL NOT NULL,
                fees REAL NOT NULL,
                net_pnl REAL NOT NULL,
                pnl_pct REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);

            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                position_id INTEGER NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                amount REAL NOT NULL,
                entry_fee REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                high_water REAL,
                status TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                kind TEXT NOT NULL,
                price REAL NOT NULL,
                strength REAL NOT NULL,
                taken INTEGER NOT NULL,
                reject_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS performance (
                date TEXT PRIMARY KEY,
                total_return_pct REAL NOT NULL,
                win_rate_pct REAL NOT NULL,
                profit_factor REAL NOT NULL,
                sharpe_ratio REAL NOT NULL,
                max_drawdown_pct REAL NOT NULL,
                total_trades INTEGER NOT NULL,
                final_capital REAL NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                cycle_count INTEGER NOT NULL,
                capital REAL NOT NULL,
                peak_capital REAL NOT NULL,
                equity REAL NOT NULL,
                open_positions INTEGER NOT NULL,
                drawdown_pct REAL NOT NULL,
                consecutive_losses INTEGER NOT NULL,
                halted INTEGER NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_trade(&self, trade: &Trade) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trades
             (position_id, symbol, strategy, side, amount, entry_price, exit_price,
              entry_time, exit_time, pnl, fees, net_pnl, pnl_pct, exit_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                trade.position_id as i64,
                trade.symbol.as_str(),
                trade.strategy,
                trade.side.as_str(),
                trade.amount,
                trade.entry_price,
                trade.exit_price,
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
                trade.pnl,
                trade.fees,
                trade.net_pnl,
                trade.pnl_pct,
                trade.exit_reason.as_str(),
            ],
        )?;

        debug!(
            "Trade saved: {} {} {:.6} | net {:+.2} | {}",
            trade.side, trade.symbol, trade.amount, trade.net_pnl, trade.exit_reason
        );
        Ok(())
    }

    pub fn save_position_snapshot(&self, position: &Position) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO positions
             (symbol, position_id, strategy, side, entry_price, entry_time, amount,
              entry_fee, stop_loss, take_profit, high_water, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP)",
            params![
                position.symbol.as_str(),
                position.id as i64,
                position.strategy,
                position.side.as_str(),
                position.entry_price,
                position.entry_time.to_rfc3339(),
                position.amount,
                position.entry_fee,
                position.stop_loss,
                position.take_profit,
                position.high_water,
                match position.status {
                    PositionStatus::Open => "open",
                    PositionStatus::Closed => "closed",
                },
            ],
        )?;
        Ok(())
    }

    pub fn mark_position_closed(&self, symbol: &Symbol) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE positions SET status = 'closed', updated_at = CURRENT_TIMESTAMP
             WHERE symbol = ?1",
            params![symbol.as_str()],
        )?;
        Ok(())
    }

    /// Open positions from a previous session, for crash recovery
    pub fn load_open_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, position_id, strategy, side, entry_price, entry_time,
                    amount, entry_fee, stop_loss, take_profit, high_water
             FROM positions WHERE status = 'open'",
        )?;

        let positions = stmt
            .query_map([], |row| {
                let side: String = row.get(3)?;
                let entry_time: String = row.get(5)?;
                Ok(Position {
                    symbol: Symbol::new(row.get::<_, String>(0)?),
                    id: row.get::<_, i64>(1)? as u64,
                    strategy: row.get(2)?,
                    side: if side == "short" { Side::Short } else { Side::Long },
                    entry_price: row.get(4)?,
                    entry_time: entry_time
                        .parse()
                        .unwrap_or_else(|_| chrono::Utc::now()),
                    amount: row.get(6)?,
                    entry_fee: row.get(7)?,
                    stop_loss: row.get(8)?,
                    take_profit: row.get(9)?,
                    high_water: row.get(10)?,
                    status: PositionStatus::Open,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!("Loaded {} open positions", positions.len());
        Ok(positions)
    }

    pub fn save_signal(&self, signal: &SignalRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO signals
             (timestamp, symbol, strategy, kind, price, strength, taken, reject_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal.timestamp.to_rfc3339(),
                signal.symbol.as_str(),
                signal.strategy,
                signal.kind.as_str(),
                signal.price,
                signal.strength,
                signal.taken as i64,
                signal.reject_reason,
            ],
        )?;
        Ok(())
    }

    pub fn save_performance_snapshot(
        &self,
        metrics: &PerformanceMetrics,
        date: NaiveDate,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO performance
             (date, total_return_pct, win_rate_pct, profit_factor, sharpe_ratio,
              max_drawdown_pct, total_trades, final_capital)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                date.to_string(),
                metrics.total_return_pct,
                metrics.win_rate_pct,
                // SQLite has no +inf literal; store a sentinel
                if metrics.profit_factor.is_finite() {
                    metrics.profit_factor
                } else {
                    -1.0
                },
                metrics.sharpe_ratio,
                metrics.max_drawdown_pct,
                metrics.total_trades as i64,
                metrics.final_capital,
            ],
        )?;
        Ok(())
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checkpoints
             (timestamp, cycle_count, capital, peak_capital, equity, open_positions,
              drawdown_pct, consecutive_losses, halted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                checkpoint.timestamp,
                checkpoint.cycle_count,
                checkpoint.capital,
                checkpoint.peak_capital,
                checkpoint.equity,
                checkpoint.open_positions,
                checkpoint.drawdown_pct,
                checkpoint.consecutive_losses,
                checkpoint.halted as i64,
            ],
        )?;
        debug!(
            "Checkpoint saved: cycle={}, equity={:.2}",
            checkpoint.cycle_count, checkpoint.equity
        );
        Ok(())
    }

    pub fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp, cycle_count, capital, peak_capital, equity, open_positions,
                    drawdown_pct, consecutive_losses, halted
             FROM checkpoints ORDER BY id DESC LIMIT 1",
        )?;

        let checkpoint = stmt.query_row([], |row| {
            Ok(Checkpoint {
                timestamp: row.get(0)?,
                cycle_count: row.get(1)?,
                capital: row.get(2)?,
                peak_capital: row.get(3)?,
                equity: row.get(4)?,
                open_positions: row.get(5)?,
                drawdown_pct: row.get(6)?,
                consecutive_losses: row.get(7)?,
                halted: row.get::<_, i64>(8)? != 0,
            })
        });

        match checkpoint {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent trades, newest first
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<(String, f64, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT symbol, net_pnl, exit_reason FROM trades ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ExitReason is stored as its snake_case string; keep the round trip close by
impl std::str::FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "take_profit" => Ok(ExitReason::TakeProfit),
            "stop_loss" => Ok(ExitReason::StopLoss),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "manual" => Ok(ExitReason::Manual),
            "signal" => Ok(ExitReason::Signal),
            "timeout" => Ok(ExitReason::Timeout),
            other => Err(format!("unknown exit reason '{}'", other)),
        }
    }
}
