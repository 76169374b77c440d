//! MACD (Moving Average Convergence Divergence)
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line

use super::moving_average::ema_series;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD for every bar. All EMAs are seeded by their first input value.
pub fn macd_series(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdPoint> {
    let ema_fast = ema_series(prices, fast);
    let ema_slow = ema_series(prices, slow);

    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&line, signal);

    line.iter()
        .zip(&signal_line)
        .map(|(&line, &signal)| MacdPoint {
            line,
            signal,
            histogram: line - signal,
        })
        .collect()
}
