//! Telegram notifications
//!
//! Fire-and-forget lifecycle messages. Enabled only when
//! `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` are present in the
//! environment (a `.env` file works); send failures are logged and
//! never interrupt trading.

use tracing::{debug, warn};

use crate::{Position, Trade};

pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Build from the environment; `None` disables notifications
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if token.is_empty() || chat_id.is_empty() {
            return None;
        }

        Some(TelegramNotifier {
            token,
            chat_id,
            client: reqwest::Client::new(),
        })
    }

    pub async fn send(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let result = self
            .client
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Telegram message sent");
            }
            Ok(response) => {
                warn!("Telegram API returned {}", response.status());
            }
            Err(e) => {
                warn!("Telegram send failed: {}", e);
            }
        }
    }

    pub async fn notify_startup(&self, capital: f64, pairs: &[String], paper: bool) {
        let mode = if paper { "paper" } else { "live" };
        self.send(&format!(
            "Bot started ({} mode)\nCapital: ${:.2}\nPairs: {}",
            mode,
            capital,
            pairs.join(", ")
        ))
        .await;
    }

    pub async fn notify_position_opened(&self, position: &Position) {
        self.send(&format!(
            "OPENED {} {} {:.6} @ ${:.2}\nSL ${:.2} | TP ${:.2}",
            position.side,
            position.symbol,
            position.amount,
            position.entry_price,
            position.stop_loss,
            position.take_profit
        ))
        .await;
    }

    pub async fn notify_trade_closed(&self, trade: &Trade) {
        let marker = if trade.net_pnl >= 0.0 { "WIN" } else { "LOSS" };
        self.send(&format!(
            "CLOSED {} {} @ ${:.2}\n{}: {:+.2} ({:+.2}%)\nReason: {}",
            trade.side,
            trade.symbol,
            trade.exit_price,
            marker,
            trade.net_pnl,
            trade.pnl_pct,
            trade.exit_reason
        ))
        .await;
    }

    pub async fn notify_kill_switch(&self, reason: &str, drawdown_pct: f64) {
        self.send(&format!(
            "KILL SWITCH ACTIVE\n{}\nDrawdown: {:.2}%\nNew entries are halted until reset.",
            reason, drawdown_pct
        ))
        .await;
    }

    pub async fn notify_circuit_breaker(&self, symbol: &str, reason: &str) {
        self.send(&format!("Circuit breaker on {}: {}", symbol, reason))
            .await;
    }
}
