//! Binance API client for public market data
//!
//! No API key required: klines and 24hr tickers are public endpoints.
//! Used by the live loop for fresh candles and by the download command
//! for historical data.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::Candle;

/// Base URL for the Binance REST API
const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Maximum klines per request (Binance limit)
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Delay between paginated requests (ms)
const RATE_LIMIT_DELAY_MS: u64 = 100;

/// Latest market state for one symbol
#[derive(Debug, Clone, Copy)]
pub struct TickerSnapshot {
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: f64,
}

/// Binance public-data client
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        BinanceClient { client }
    }

    /// Fetch klines for a symbol and interval.
    ///
    /// `start_time`/`end_time` are epoch milliseconds; `limit` caps the
    /// batch at Binance's per-request maximum.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/klines", BINANCE_API_BASE);

        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }
        let limit = limit
            .unwrap_or(MAX_KLINES_PER_REQUEST)
            .min(MAX_KLINES_PER_REQUEST);
        params.push(("limit", limit.to_string()));

        debug!(
            "Fetching klines: symbol={}, interval={}, limit={}",
            symbol, interval, limit
        );

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("Failed to send request to Binance")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        Ok(raw.iter().filter_map(|row| candle_from_raw(row)).collect())
    }

    /// Fetch full history by paginating through multiple requests
    pub async fn fetch_full_history(
        &self,
        symbol: &str,
        interval: &str,
        days_back: u32,
    ) -> Result<Vec<Candle>> {
        let end_time = Utc::now().timestamp_millis();
        let start_time = (Utc::now() - Duration::days(days_back as i64)).timestamp_millis();

        info!(
            "Fetching {} {} data from Binance ({} days back)",
            symbol, interval, days_back
        );

        let mut all_candles: Vec<Candle> = Vec::new();
        let mut current_start = start_time;

        while current_start < end_time {
            match self
                .get_klines(
                    symbol,
                    interval,
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_KLINES_PER_REQUEST),
                )
                .await
            {
                Ok(candles) => {
                    if candles.is_empty() {
                        break;
                    }
                    if let Some(last) = candles.last() {
                        current_start = last.datetime.timestamp_millis() + 1;
                    }
                    all_candles.extend(candles);
                    tokio::time::sleep(StdDuration::from_millis(RATE_LIMIT_DELAY_MS)).await;
                }
                Err(e) => {
                    warn!("Error fetching klines: {}", e);
                    break;
                }
            }
        }

        all_candles.sort_by_key(|c| c.datetime);
        all_candles.dedup_by_key(|c| c.datetime);

        info!("Fetched {} candles for {} {}", all_candles.len(), symbol, interval);
        Ok(all_candles)
    }

    /// Latest price, book top, and 24h volume for a symbol
    pub async fn fetch_snapshot(&self, symbol: &str) -> Result<TickerSnapshot> {
        let url = format!("{}/ticker/24hr", BINANCE_API_BASE);

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Ticker24h {
            last_price: String,
            bid_price: String,
            ask_price: String,
            volume: String,
        }

        let ticker: Ticker24h = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("Failed to fetch ticker")?
            .error_for_status()
            .context("Binance ticker error")?
            .json()
            .await
            .context("Failed to parse ticker response")?;

        let parse = |s: &str| s.parse::<f64>().ok().filter(|v| *v > 0.0);

        Ok(TickerSnapshot {
            last: parse(&ticker.last_price)
                .with_context(|| format!("bad last price '{}'", ticker.last_price))?,
            bid: parse(&ticker.bid_price),
            ask: parse(&ticker.ask_price),
            volume: ticker.volume.parse().unwrap_or(0.0),
        })
    }

    /// Check server connectivity
    pub async fn ping(&self) -> Result<bool> {
        let url = format!("{}/ping", BINANCE_API_BASE);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

/// Parse one raw kline row:
/// `[open_time, open, high, low, close, volume, close_time, ...]`
fn candle_from_raw(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let open_time = row[0].as_i64()?;
    let parse = |v: &serde_json::Value| v.as_str()?.parse::<f64>().ok();

    Some(Candle {
        datetime: DateTime::from_timestamp_millis(open_time)?,
        open: parse(&row[1])?,
        high: parse(&row[2])?,
        low: parse(&row[3])?,
        close: parse(&row[4])?,
        volume: parse(&row[5])?,
    })
}
