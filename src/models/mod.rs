use crate::{BotError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Rolling window of candles, oldest first, timestamps strictly increasing.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    candles: Vec<Candle>,
}

impl PriceSeries {
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for pair in candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(BotError::MarketData(format!(
                    "candle timestamps not increasing: {} then {}",
                    pair[0].timestamp, pair[1].timestamp
                )));
            }
        }

        Ok(Self { candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Latest close as a decimal price.
    pub fn current_price(&self) -> Result<Decimal> {
        let last = self.last().ok_or(BotError::EmptySeries)?;
        let price = Decimal::try_from(last.close).map_err(|_| {
            BotError::MarketData(format!("close {} is not a finite price", last.close))
        })?;

        if price <= Decimal::ZERO {
            return Err(BotError::InvalidPrice(price));
        }

        Ok(price)
    }
}

/// Executed trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// Outcome of one evaluation cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "buy",
            Decision::Sell => "sell",
            Decision::Hold => "hold",
        }
    }

    pub fn is_trade(&self) -> bool {
        !matches!(self, Decision::Hold)
    }
}

impl From<TradeAction> for Decision {
    fn from(action: TradeAction) -> Self {
        match action {
            TradeAction::Buy => Decision::Buy,
            TradeAction::Sell => Decision::Sell,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            other => Err(format!("unknown trade action '{}'", other)),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Decision::Buy),
            "sell" => Ok(Decision::Sell),
            "hold" => Ok(Decision::Hold),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Executed paper trade. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub rsi: Option<f64>,
    pub sentiment: f64,
    pub action: TradeAction,
    pub trade_amount: Decimal, // asset units
    pub trade_price: Decimal,
    pub fee: Decimal,
    pub resulting_balance: Decimal,
    pub resulting_position: Decimal,
    pub reason: String,
}

/// One per evaluation cycle, holds included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub rsi: Option<f64>,
    pub sentiment: f64,
    pub target_ratio: Decimal,
    pub decision: Decision,
    pub reason: String,
}

/// Single item returned by the sentiment collaborator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SentimentScore {
    pub sentiment: f64,  // -1.0 ..= 1.0
    pub confidence: f64, // 0 ..= 100, informational
}
