//! Historical candle data
//!
//! CSV-backed candle storage (one `{SYMBOL}_{timeframe}.csv` per pair),
//! validation helpers, and parallel multi-symbol loading for backtests.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{Candle, Symbol};

/// Path of the candle file for a symbol/timeframe pair
pub fn candle_file(data_dir: impl AsRef<Path>, symbol: &Symbol, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.as_str(), timeframe))
}

/// Write candles to CSV, overwriting any existing file
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for candle in candles {
        writer.serialize(candle)?;
    }
    writer.flush()?;

    tracing::debug!("Saved {} candles to {}", candles.len(), path.display());
    Ok(())
}

/// Load candles from CSV, sorted by timestamp with duplicates removed
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut candles: Vec<Candle> = reader
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);

    tracing::debug!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

/// Check a single candle for malformed values
pub fn validate_candle(candle: &Candle) -> std::result::Result<(), String> {
    let prices = [candle.open, candle.high, candle.low, candle.close];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(format!(
            "non-finite or non-positive price (O:{} H:{} L:{} C:{})",
            candle.open, candle.high, candle.low, candle.close
        ));
    }
    if candle.high < candle.low {
        return Err(format!("high {} below low {}", candle.high, candle.low));
    }
    if candle.high < candle.open.max(candle.close) || candle.low > candle.open.min(candle.close) {
        return Err("open/close outside the high-low range".to_string());
    }
    if !candle.volume.is_finite() || candle.volume < 0.0 {
        return Err(format!("invalid volume {}", candle.volume));
    }
    Ok(())
}

/// Series-level validation outcome
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate every candle plus timestamp ordering across the series
pub fn validate_candles(candles: &[Candle]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (i, candle) in candles.iter().enumerate() {
        if let Err(detail) = validate_candle(candle) {
            report.errors.push(format!("candle {}: {}", i, detail));
        }
    }
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].datetime <= pair[0].datetime {
            report
                .errors
                .push(format!("candle {}: timestamp not increasing", i + 1));
        }
    }

    report
}

/// Load all symbols for one timeframe in parallel.
///
/// Fails if any file is missing or unreadable, naming the file.
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path> + Sync,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<HashMap<Symbol, Vec<Candle>>> {
    let loaded: Vec<(Symbol, Vec<Candle>)> = symbols
        .par_iter()
        .map(|symbol| {
            let path = candle_file(&data_dir, symbol, timeframe);
            load_csv(&path).map(|candles| (symbol.clone(), candles))
        })
        .collect::<Result<_>>()?;

    Ok(loaded.into_iter().collect())
}

/// Symbol/timeframe pairs whose candle files are absent
pub fn find_missing_data(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Vec<Symbol> {
    symbols
        .iter()
        .filter(|symbol| !candle_file(&data_dir, symbol, timeframe).exists())
        .cloned()
        .collect()
}
