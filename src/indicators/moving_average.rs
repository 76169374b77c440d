/// Simple Moving Average for every bar; `None` until `period` values exist
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;

    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= period {
            sum -= values[i - period];
        }

        if i + 1 >= period {
            out.push(Some(sum / period as f64));
        } else {
            out.push(None);
        }
    }

    out
}

/// Exponential Moving Average for every bar
///
/// Smoothing factor is `2 / (period + 1)` and the average is seeded with the
/// first value, so every bar has a value.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut iter = values.iter();

    let Some(first) = iter.next() else {
        return out;
    };

    let mut ema = *first;
    out.push(ema);

    for price in iter {
        ema = (price - ema) * multiplier + ema;
        out.push(ema);
    }

    out
}

/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Latest Exponential Moving Average (EMA)
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}
