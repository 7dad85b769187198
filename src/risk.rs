//! Portfolio risk governor
//!
//! Tracks realized capital, the capital peak, and loss streaks, and
//! gates every new position behind the kill switch and the portfolio
//! limits. Capital changes only when a trade closes; open positions
//! reserve notional against the exposure budget but never debit cash.
//!
//! The kill switch is sticky: once drawdown or the loss streak trips it,
//! it stays active until [`RiskManager::reset_kill_switch`] is called,
//! and a reset only holds while the trigger condition itself has
//! cleared. Open positions keep being managed while halted; only new
//! entries are rejected.

use crate::config::RiskConfig;
use crate::error::TradeError;

#[derive(Debug, Clone)]
pub struct RiskManager {
    pub initial_capital: f64,
    capital: f64,
    peak_capital: f64,
    consecutive_losses: usize,
    consecutive_wins: usize,
    halted: bool,
    halt_reason: Option<String>,
    config: RiskConfig,
    max_positions: usize,
}

impl RiskManager {
    pub fn new(initial_capital: f64, config: RiskConfig, max_positions: usize) -> Self {
        RiskManager {
            initial_capital,
            capital: initial_capital,
            peak_capital: initial_capital,
            consecutive_losses: 0,
            consecutive_wins: 0,
            halted: false,
            halt_reason: None,
            config,
            max_positions,
        }
    }

    pub fn from_config(cfg: &crate::Config) -> Self {
        RiskManager::new(
            cfg.trading.initial_capital,
            cfg.risk.clone(),
            cfg.trading.max_positions,
        )
    }

    /// Realized capital (cash equity)
    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn peak_capital(&self) -> f64 {
        self.peak_capital
    }

    pub fn consecutive_losses(&self) -> usize {
        self.consecutive_losses
    }

    pub fn consecutive_wins(&self) -> usize {
        self.consecutive_wins
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Drawdown from the realized-capital peak, as a fraction
    pub fn current_drawdown(&self) -> f64 {
        if self.peak_capital <= 0.0 {
            return 0.0;
        }
        ((self.peak_capital - self.capital) / self.peak_capital).max(0.0)
    }

    /// Restore state persisted by a previous session (crash recovery)
    pub fn restore(&mut self, capital: f64, peak_capital: f64, consecutive_losses: usize) {
        self.capital = capital;
        self.peak_capital = peak_capital.max(capital);
        self.consecutive_losses = consecutive_losses;
        self.check_kill_switch();
    }

    /// Apply a closed trade's net PnL and update streaks and the peak
    pub fn apply_trade(&mut self, net_pnl: f64) {
        self.capital += net_pnl;

        if net_pnl > 0.0 {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
            if self.capital > self.peak_capital {
                self.peak_capital = self.capital;
            }
        } else if net_pnl < 0.0 {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }

        self.check_kill_switch();
    }

    /// Evaluate kill-switch conditions; sets the sticky halted flag
    pub fn check_kill_switch(&mut self) -> bool {
        if !self.config.enable_kill_switch {
            return false;
        }

        let drawdown = self.current_drawdown();
        if drawdown >= self.config.max_drawdown {
            if !self.halted {
                tracing::error!(
                    "KILL SWITCH: drawdown {:.2}% >= {:.2}%",
                    drawdown * 100.0,
                    self.config.max_drawdown * 100.0
                );
            }
            self.halted = true;
            self.halt_reason = Some(format!(
                "drawdown {:.2}% >= {:.2}%",
                drawdown * 100.0,
                self.config.max_drawdown * 100.0
            ));
        } else if self.consecutive_losses >= self.config.max_consecutive_losses {
            if !self.halted {
                tracing::error!(
                    "KILL SWITCH: {} consecutive losses >= {}",
                    self.consecutive_losses,
                    self.config.max_consecutive_losses
                );
            }
            self.halted = true;
            self.halt_reason = Some(format!(
                "{} consecutive losses >= {}",
                self.consecutive_losses, self.config.max_consecutive_losses
            ));
        }

        self.halted
    }

    /// Clear the kill switch. The loss streak is zeroed with it; a halt
    /// caused by drawdown re-arms on the next gate check until capital
    /// recovers above the threshold.
    pub fn reset_kill_switch(&mut self) {
        tracing::info!("Kill switch reset");
        self.halted = false;
        self.halt_reason = None;
        self.consecutive_losses = 0;
    }

    /// Gate for opening a new position
    pub fn ensure_can_open(&mut self, open_position_count: usize) -> Result<(), TradeError> {
        if self.check_kill_switch() {
            return Err(TradeError::TradingHalted(
                self.halt_reason.clone().unwrap_or_default(),
            ));
        }

        if open_position_count >= self.max_positions {
            return Err(TradeError::ExposureLimitExceeded(format!(
                "max positions reached ({})",
                self.max_positions
            )));
        }

        Ok(())
    }
}
