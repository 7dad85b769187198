//! Download command implementation
//!
//! Fetches historical klines from Binance's public API into the local
//! CSV store, one file per symbol/timeframe pair.

use anyhow::{Context, Result};
use tracing::{info, warn};

use tradebot::data;
use tradebot::exchange::BinanceClient;
use tradebot::Symbol;

/// Accept both short names ("BTC") and full pairs ("BTCUSDT")
fn to_pair(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.ends_with("USDT") {
        symbol
    } else {
        format!("{}USDT", symbol)
    }
}

pub fn run(symbols: String, timeframes: String, days: u32, output: String) -> Result<()> {
    let pairs: Vec<String> = symbols.split(',').map(to_pair).collect();
    let timeframes: Vec<String> = timeframes
        .split(',')
        .map(|t| t.trim().to_string())
        .collect();

    info!(
        "Downloading {} days of history for {} pairs x {} timeframes",
        days,
        pairs.len(),
        timeframes.len()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let client = BinanceClient::new();
        let mut failures = 0usize;

        for pair in &pairs {
            for timeframe in &timeframes {
                match client.fetch_full_history(pair, timeframe, days).await {
                    Ok(candles) if !candles.is_empty() => {
                        let path = data::candle_file(&output, &Symbol::new(pair.clone()), timeframe);
                        data::save_csv(&path, &candles)?;
                        println!(
                            "  {} {}: {} candles -> {}",
                            pair,
                            timeframe,
                            candles.len(),
                            path.display()
                        );
                    }
                    Ok(_) => {
                        warn!("{} {}: no data returned", pair, timeframe);
                        failures += 1;
                    }
                    Err(e) => {
                        warn!("{} {}: {}", pair, timeframe, e);
                        failures += 1;
                    }
                }
            }
        }

        if failures > 0 {
            println!("  {} downloads failed, see the log", failures);
        }
        Ok(())
    })
}
