//! Live trading command
//!
//! Polling loop over the configured pairs: fetch fresh candles and a
//! ticker snapshot per symbol, feed the engine one tick at a time, and
//! persist every outcome. Execution is paper (simulated fills at live
//! prices); the exchange is only consulted for market data.
//!
//! Graceful shutdown on ctrl-c closes open positions and writes a final
//! checkpoint so the next session can recover where this one left off.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use tradebot::engine::{Engine, MarketSnapshot, TickReport};
use tradebot::exchange::BinanceClient;
use tradebot::metrics;
use tradebot::notify::TelegramNotifier;
use tradebot::store::{Checkpoint, SqliteStore};
use tradebot::{Config, EquityPoint, MarketTick, Symbol, Trade};

struct LiveTrader {
    config: Config,
    engine: Engine,
    client: BinanceClient,
    store: SqliteStore,
    notifier: Option<TelegramNotifier>,
    cycle_count: i64,
    halt_notified: bool,
    session_trades: Vec<Trade>,
    session_equity: Vec<EquityPoint>,
}

impl LiveTrader {
    fn new(config: Config) -> Result<Self> {
        let engine = Engine::new(&config).context("Failed to build engine")?;
        let store =
            SqliteStore::open(&config.bot.state_dir).context("Failed to open state store")?;
        let notifier = TelegramNotifier::from_env();
        if notifier.is_none() {
            info!("Telegram notifications disabled (no credentials in environment)");
        }

        Ok(LiveTrader {
            config,
            engine,
            client: BinanceClient::new(),
            store,
            notifier,
            cycle_count: 0,
            halt_notified: false,
            session_trades: Vec::new(),
            session_equity: Vec::new(),
        })
    }

    /// Restore capital, streaks, and open positions from the last session
    fn recover_state(&mut self) -> Result<()> {
        if let Some(checkpoint) = self.store.load_checkpoint()? {
            info!(
                "Recovered checkpoint: cycle={}, capital={:.2}, drawdown={:.2}%",
                checkpoint.cycle_count, checkpoint.capital, checkpoint.drawdown_pct
            );
            self.cycle_count = checkpoint.cycle_count;
            self.engine.risk_mut().restore(
                checkpoint.capital,
                checkpoint.peak_capital,
                checkpoint.consecutive_losses as usize,
            );
        } else {
            info!("No previous checkpoint, starting fresh");
        }

        for position in self.store.load_open_positions()? {
            info!(
                "Recovered position: {} {} {:.6} @ {:.2}",
                position.side, position.symbol, position.amount, position.entry_price
            );
            self.engine.restore_position(position);
        }
        Ok(())
    }

    async fn run_cycle(&mut self) -> Result<()> {
        self.cycle_count += 1;
        info!("--- Cycle {} ---", self.cycle_count);

        for pair in self.config.trading.pairs.clone() {
            let symbol = Symbol::new(pair.clone());

            let candles = match self
                .client
                .get_klines(
                    &pair,
                    &self.config.trading.timeframe,
                    None,
                    None,
                    Some(self.config.bot.candle_history as u32),
                )
                .await
            {
                Ok(candles) if candles.len() >= self.engine.min_candles() => candles,
                Ok(candles) => {
                    debug!("{}: insufficient history ({} candles)", symbol, candles.len());
                    continue;
                }
                Err(e) => {
                    warn!("{}: kline fetch failed: {}", symbol, e);
                    continue;
                }
            };

            let ticker = match self.client.fetch_snapshot(&pair).await {
                Ok(ticker) => ticker,
                Err(e) => {
                    warn!("{}: ticker fetch failed: {}", symbol, e);
                    continue;
                }
            };

            let snapshot = MarketSnapshot {
                timestamp: Utc::now(),
                tick: MarketTick::from_last(ticker.last),
                bid: ticker.bid,
                ask: ticker.ask,
                volume: candles.last().map(|c| c.volume).unwrap_or(0.0),
                candles: &candles,
            };

            match self.engine.evaluate_tick(&symbol, &snapshot) {
                Ok(report) => self.handle_report(&symbol, report).await,
                Err(e) => warn!("{}: tick skipped: {}", symbol, e),
            }
        }

        self.watch_kill_switch().await;

        self.session_equity.push(EquityPoint {
            timestamp: Utc::now(),
            equity: self.engine.equity(),
        });
        self.save_checkpoint()?;
        self.save_performance()?;

        info!(
            "Cycle {} complete: equity={:.2}, positions={}, drawdown={:.2}%",
            self.cycle_count,
            self.engine.equity(),
            self.engine.book().len(),
            self.engine.risk().current_drawdown() * 100.0
        );
        Ok(())
    }

    /// Persist and announce everything one tick produced
    async fn handle_report(&mut self, symbol: &Symbol, report: TickReport) {
        if let Some(signal) = &report.signal {
            match &signal.reject_reason {
                Some(reason) => info!(
                    "{}: {} signal not taken ({})",
                    symbol, signal.kind, reason
                ),
                None => info!("{}: {} signal taken", symbol, signal.kind),
            }
            if let Err(e) = self.store.save_signal(signal) {
                error!("Failed to persist signal: {}", e);
            }
            if let (Some(notifier), Some(reason)) = (&self.notifier, &signal.reject_reason) {
                if reason.starts_with("circuit breaker") {
                    notifier.notify_circuit_breaker(symbol.as_str(), reason).await;
                }
            }
        }

        for trade in &report.closed {
            if let Err(e) = self.store.save_trade(trade) {
                error!("Failed to persist trade: {}", e);
            }
            if let Err(e) = self.store.mark_position_closed(symbol) {
                error!("Failed to update position row: {}", e);
            }
            if let Some(notifier) = &self.notifier {
                notifier.notify_trade_closed(trade).await;
            }
            self.session_trades.push(trade.clone());
        }

        if let Some(position) = &report.opened {
            if let Err(e) = self.store.save_position_snapshot(position) {
                error!("Failed to persist position: {}", e);
            }
            if let Some(notifier) = &self.notifier {
                notifier.notify_position_opened(position).await;
            }
        } else if let Some(position) = self.engine.book().get(symbol) {
            // Keep the snapshot fresh; trailing may have moved the stop
            if let Err(e) = self.store.save_position_snapshot(position) {
                error!("Failed to refresh position snapshot: {}", e);
            }
        }
    }

    /// Announce kill-switch transitions exactly once per activation
    async fn watch_kill_switch(&mut self) {
        if self.engine.risk().is_halted() {
            if !self.halt_notified {
                let reason = self
                    .engine
                    .risk()
                    .halt_reason()
                    .unwrap_or("unknown")
                    .to_string();
                let drawdown = self.engine.risk().current_drawdown() * 100.0;
                error!("KILL SWITCH ACTIVE: {}", reason);
                error!("Open positions continue to be managed; new entries are blocked.");
                if let Some(notifier) = &self.notifier {
                    notifier.notify_kill_switch(&reason, drawdown).await;
                }
                self.halt_notified = true;
            }
        } else {
            self.halt_notified = false;
        }
    }

    /// Daily performance snapshot computed over this session's record
    fn save_performance(&self) -> Result<()> {
        let snapshot = metrics::calculate(
            &self.session_trades,
            &self.session_equity,
            self.config.trading.initial_capital,
            self.config.backtest.risk_free_rate,
            metrics::periods_per_year(&self.config.trading.timeframe),
        );
        self.store
            .save_performance_snapshot(&snapshot, Utc::now().date_naive())
    }

    fn save_checkpoint(&self) -> Result<()> {
        let risk = self.engine.risk();
        self.store.save_checkpoint(&Checkpoint {
            timestamp: Utc::now().to_rfc3339(),
            cycle_count: self.cycle_count,
            capital: risk.capital(),
            peak_capital: risk.peak_capital(),
            equity: self.engine.equity(),
            open_positions: self.engine.book().len() as i64,
            drawdown_pct: risk.current_drawdown() * 100.0,
            consecutive_losses: risk.consecutive_losses() as i64,
            halted: risk.is_halted(),
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down...");

        let trades = self.engine.close_all(Utc::now());
        for trade in &trades {
            if let Err(e) = self.store.save_trade(trade) {
                error!("Failed to persist trade during shutdown: {}", e);
            }
            let _ = self.store.mark_position_closed(&trade.symbol);
            if let Some(notifier) = &self.notifier {
                notifier.notify_trade_closed(trade).await;
            }
        }

        self.save_checkpoint()?;
        info!(
            "Shutdown complete. Final capital: {:.2}",
            self.engine.risk().capital()
        );
        Ok(())
    }
}

pub fn run(
    config_path: String,
    interval_secs: u64,
    reset_kill_switch: bool,
) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, interval_secs, reset_kill_switch))
}

async fn run_async(
    config_path: String,
    interval_secs: u64,
    reset_kill_switch: bool,
) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    info!("{}", "=".repeat(60));
    info!("TRADEBOT - PAPER TRADING");
    info!("{}", "=".repeat(60));
    info!("Strategy:  {}", config.strategy_name);
    info!("Pairs:     {}", config.trading.pairs.join(", "));
    info!("Timeframe: {}", config.trading.timeframe);
    info!("Capital:   ${:.2}", config.trading.initial_capital);
    info!("Interval:  {}s", interval_secs);
    info!("{}", "=".repeat(60));
    warn!("Running in SIMULATION mode - no real orders are placed");

    let mut trader = LiveTrader::new(config)?;
    trader.recover_state()?;

    if reset_kill_switch {
        trader.engine.risk_mut().reset_kill_switch();
    }

    if let Some(notifier) = &trader.notifier {
        notifier
            .notify_startup(
                trader.engine.risk().capital(),
                &trader.config.trading.pairs,
                true,
            )
            .await;
    }

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received ctrl-c, shutting down...");
                shutdown_flag_clone.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => error!("Signal handler error: {}", e),
        }
    });

    let mut cycle_interval = interval(Duration::from_secs(interval_secs));
    info!("Starting trading loop...");

    loop {
        tokio::select! {
            _ = cycle_interval.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = trader.run_cycle().await {
                    error!("Trading cycle error: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    trader.shutdown().await?;
    info!("Live session ended.");
    Ok(())
}
