// Layered settings: built-in defaults, optional config/paperbot.toml, then
// PAPERBOT__SECTION__KEY environment variables
use crate::api::{news, openai, reddit, upbit};
use crate::execution::{LedgerState, RebalanceConfig};
use crate::indicators::IndicatorConfig;
use crate::sentiment::gate::DEFAULT_THRESHOLD_PERCENT;
use crate::strategy::SignalRatioConfig;
use crate::{BotError, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/paperbot";
const ENV_PREFIX: &str = "PAPERBOT";
const MAX_CANDLE_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub market: MarketSettings,
    pub trading: TradingSettings,
    pub policy: SignalRatioConfig,
    pub indicators: IndicatorConfig,
    pub sentiment: SentimentSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub instrument: String,
    pub timeframe: String,
    pub candle_limit: usize,
    pub api_url: String,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            instrument: "KRW-BTC".to_string(),
            timeframe: "5m".to_string(),
            candle_limit: 50,
            api_url: upbit::UPBIT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub base_ratio: Decimal,
    pub fee_rate: Decimal,
    pub rebalance_threshold: Decimal,
    pub min_order_amount: Decimal,
    pub max_order_amount: Decimal,
    pub seed_balance: Decimal,
    pub seed_position: Decimal,
}

impl Default for TradingSettings {
    fn default() -> Self {
        let rebalance = RebalanceConfig::default();
        Self {
            base_ratio: dec!(0.5),
            fee_rate: rebalance.fee_rate,
            rebalance_threshold: rebalance.rebalance_threshold,
            min_order_amount: rebalance.min_order_amount,
            max_order_amount: rebalance.max_order_amount,
            seed_balance: dec!(1000000),
            seed_position: Decimal::ZERO,
        }
    }
}

impl TradingSettings {
    pub fn rebalance_config(&self) -> RebalanceConfig {
        RebalanceConfig {
            fee_rate: self.fee_rate,
            rebalance_threshold: self.rebalance_threshold,
            min_order_amount: self.min_order_amount,
            max_order_amount: self.max_order_amount,
        }
    }

    pub fn seed_state(&self) -> LedgerState {
        LedgerState::new(self.seed_balance, self.seed_position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentSettings {
    /// Price move (percent) that triggers a fresh score
    pub threshold_percent: f64,
    pub model: String,
    pub openai_url: String,
    pub reddit_url: String,
    pub subreddits: Vec<String>,
    pub posts_per_subreddit: usize,
    /// RSS feeds read for news headlines
    pub news_feeds: Vec<String>,
    pub headlines_per_feed: usize,
    /// Only queried when CRYPTOPANIC_API_KEY is set
    pub cryptopanic_url: String,
    pub cryptopanic_currencies: String,
    /// Corpus items joined into one scoring request
    pub chunk_size: usize,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            model: openai::DEFAULT_MODEL.to_string(),
            openai_url: openai::OPENAI_API_BASE.to_string(),
            reddit_url: reddit::REDDIT_API_BASE.to_string(),
            subreddits: ["CryptoCurrency", "Bitcoin", "CryptoMarkets", "BitcoinBeginners"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            posts_per_subreddit: 5,
            news_feeds: vec![news::GOOGLE_NEWS_RSS.to_string()],
            headlines_per_feed: 20,
            cryptopanic_url: news::CRYPTOPANIC_API_BASE.to_string(),
            cryptopanic_currencies: "BTC,ETH".to_string(),
            chunk_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub interval_secs: u64,
    pub database_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            database_url: "sqlite://data/trade_logs.db".to_string(),
        }
    }
}

impl Settings {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` (extension optional, file optional) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        ensure(
            t.base_ratio >= Decimal::ZERO && t.base_ratio <= Decimal::ONE,
            format!("trading.base_ratio must be within [0, 1], got {}", t.base_ratio),
        )?;
        ensure(
            t.fee_rate >= Decimal::ZERO && t.fee_rate < Decimal::ONE,
            format!("trading.fee_rate must be within [0, 1), got {}", t.fee_rate),
        )?;
        ensure(
            t.rebalance_threshold >= Decimal::ZERO && t.min_order_amount >= Decimal::ZERO,
            "trading thresholds must not be negative".to_string(),
        )?;
        ensure(
            t.max_order_amount > Decimal::ZERO && t.min_order_amount <= t.max_order_amount,
            format!(
                "trading.max_order_amount ({}) must be positive and at least min_order_amount ({})",
                t.max_order_amount, t.min_order_amount
            ),
        )?;
        ensure(
            t.seed_balance >= Decimal::ZERO && t.seed_position >= Decimal::ZERO,
            "seed balance and position must not be negative".to_string(),
        )?;

        let i = &self.indicators;
        ensure(
            i.sma_window > 0 && i.rsi_period > 0 && i.macd_signal > 0 && i.macd_fast > 0,
            "indicator windows must be positive".to_string(),
        )?;
        ensure(
            i.macd_fast < i.macd_slow,
            format!(
                "indicators.macd_fast ({}) must be below macd_slow ({})",
                i.macd_fast, i.macd_slow
            ),
        )?;

        ensure(
            self.policy.rsi_oversold < self.policy.rsi_overbought,
            "policy.rsi_oversold must be below rsi_overbought".to_string(),
        )?;
        ensure(
            self.policy.sentiment_bearish < self.policy.sentiment_bullish,
            "policy.sentiment_bearish must be below sentiment_bullish".to_string(),
        )?;

        let m = &self.market;
        ensure(
            m.candle_limit > 0 && m.candle_limit <= MAX_CANDLE_LIMIT,
            format!(
                "market.candle_limit must be within 1..={}, got {}",
                MAX_CANDLE_LIMIT, m.candle_limit
            ),
        )?;
        upbit::candles_path(&m.timeframe)?;

        let s = &self.sentiment;
        ensure(
            s.threshold_percent.is_finite() && s.threshold_percent >= 0.0,
            format!(
                "sentiment.threshold_percent must be a non-negative number, got {}",
                s.threshold_percent
            ),
        )?;
        ensure(
            s.chunk_size > 0 && s.posts_per_subreddit > 0,
            "sentiment.chunk_size and posts_per_subreddit must be positive".to_string(),
        )?;

        ensure(
            self.engine.interval_secs > 0,
            "engine.interval_secs must be positive".to_string(),
        )?;

        Ok(())
    }
}

fn ensure(condition: bool, message: String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(BotError::Config(message))
    }
}
