use super::MarketDataSource;
use crate::models::{Candle, PriceSeries};
use crate::{BotError, Result};
use chrono::NaiveDateTime;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

pub const UPBIT_API_BASE: &str = "https://api.upbit.com";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_CANDLES_PER_REQUEST: usize = 200;
// Quotation API allows 10 requests per second; stay under it
const RATE_LIMIT_RPS: NonZeroU32 = match NonZeroU32::new(8) {
    Some(n) => n,
    None => unreachable!(),
};

type UpbitRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Upbit quotation API client (public candles, no auth)
#[derive(Clone)]
pub struct UpbitClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<UpbitRateLimiter>,
    initial_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

impl UpbitClient {
    pub fn new() -> Self {
        Self::with_base_url(UPBIT_API_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(RATE_LIMIT_RPS))),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Get candles oldest first, with retry and exponential backoff on
    /// rate limiting (429) and server errors
    pub async fn get_candles(
        &self,
        market: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<PriceSeries> {
        let path = candles_path(timeframe)?;
        let url = format!("{}/v1/candles/{}", self.base_url, path);
        let count = count.clamp(1, MAX_CANDLES_PER_REQUEST);

        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.fetch_candles_once(&url, market, count).await {
                Ok(series) => {
                    if attempt > 1 {
                        tracing::info!("✓ Fetched {} candles after {} attempts", market, attempt);
                    }
                    return Ok(series);
                }
                Err(FetchError::Fatal(e)) => return Err(e),
                Err(FetchError::Retryable(e)) => {
                    if attempt < MAX_RETRIES {
                        let backoff = self.initial_backoff * 2_u32.pow(attempt - 1);
                        tracing::warn!(
                            "Attempt {}/{} failed for {}: {}. Retrying in {:?}...",
                            attempt,
                            MAX_RETRIES,
                            market,
                            e,
                            backoff
                        );
                        sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| BotError::MarketData("all retry attempts failed".to_string())))
    }

    async fn fetch_candles_once(
        &self,
        url: &str,
        market: &str,
        count: usize,
    ) -> std::result::Result<PriceSeries, FetchError> {
        let response = self
            .client
            .get(url)
            .query(&[("market", market), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| FetchError::Retryable(BotError::Http(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = BotError::MarketData(format!("Upbit API error {}: {}", status, body));

            if status.as_u16() == 429 || status.is_server_error() {
                return Err(FetchError::Retryable(err));
            }
            return Err(FetchError::Fatal(err));
        }

        let raw: Vec<UpbitCandle> = response
            .json()
            .await
            .map_err(|e| FetchError::Fatal(BotError::MarketData(format!("bad candle payload: {}", e))))?;

        let mut candles = raw
            .into_iter()
            .map(to_candle)
            .collect::<Result<Vec<_>>>()
            .map_err(FetchError::Fatal)?;

        // Upbit returns newest first
        candles.reverse();

        tracing::debug!(market, count = candles.len(), "Fetched candles from Upbit");

        PriceSeries::new(candles).map_err(FetchError::Fatal)
    }
}

impl Default for UpbitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataSource for UpbitClient {
    async fn fetch_bars(&self, instrument: &str, timeframe: &str, limit: usize) -> Result<PriceSeries> {
        self.get_candles(instrument, timeframe, limit).await
    }
}

enum FetchError {
    Retryable(BotError),
    Fatal(BotError),
}

fn to_candle(raw: UpbitCandle) -> Result<Candle> {
    let timestamp = NaiveDateTime::parse_from_str(&raw.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| {
            BotError::MarketData(format!(
                "bad candle time '{}': {}",
                raw.candle_date_time_utc, e
            ))
        })?
        .and_utc();

    Ok(Candle {
        timestamp,
        open: raw.opening_price,
        high: raw.high_price,
        low: raw.low_price,
        close: raw.trade_price,
        volume: raw.candle_acc_trade_volume,
    })
}

/// Map a timeframe like "5m", "240m", "1d" or "1w" to the candles endpoint
pub fn candles_path(timeframe: &str) -> Result<String> {
    const MINUTE_UNITS: [u32; 8] = [1, 3, 5, 10, 15, 30, 60, 240];

    if let Some(minutes) = timeframe.strip_suffix('m') {
        if let Ok(unit) = minutes.parse::<u32>() {
            if MINUTE_UNITS.contains(&unit) {
                return Ok(format!("minutes/{}", unit));
            }
        }
    }

    match timeframe {
        "1h" => Ok("minutes/60".to_string()),
        "4h" => Ok("minutes/240".to_string()),
        "1d" => Ok("days".to_string()),
        "1w" => Ok("weeks".to_string()),
        _ => Err(BotError::Config(format!("unsupported timeframe '{}'", timeframe))),
    }
}
