// Technical indicators module
// Implements SMA, EMA, RSI and MACD over candle closes

pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use macd::{macd_series, MacdPoint};
pub use moving_average::{calculate_ema, calculate_sma, ema_series, sma_series};
pub use rsi::{calculate_rsi, rsi_series};

use crate::models::PriceSeries;
use serde::{Deserialize, Serialize};

/// Indicator windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma_window: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_window: 20,
            rsi_period: 14,
            macd_fast: macd::DEFAULT_FAST,
            macd_slow: macd::DEFAULT_SLOW,
            macd_signal: macd::DEFAULT_SIGNAL,
        }
    }
}

/// Per-bar indicator values, aligned with the input candles
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub sma: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<MacdPoint>,
}

/// Indicator values of the most recent bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub sma: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdPoint>,
}

impl IndicatorSet {
    pub fn len(&self) -> usize {
        self.rsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_empty()
    }

    pub fn latest(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            sma: self.sma.last().copied().flatten(),
            rsi: self.rsi.last().copied().flatten(),
            macd: self.macd.last().copied(),
        }
    }
}

/// Compute every indicator from closes. Short series yield `None` markers.
pub fn compute(series: &PriceSeries, config: &IndicatorConfig) -> IndicatorSet {
    let closes = series.closes();

    IndicatorSet {
        sma: sma_series(&closes, config.sma_window),
        rsi: rsi_series(&closes, config.rsi_period),
        macd: macd_series(&closes, config.macd_fast, config.macd_slow, config.macd_signal),
    }
}
