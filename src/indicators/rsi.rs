/// Relative Strength Index (RSI) for every bar
///
/// Gains and losses are exponentially weighted with alpha = 1/period, taken as
/// a normalised weighted average over every bar so far. The first bar has no
/// change and counts as a zero gain and a zero loss. The first `period` bars
/// are `None`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Only gains in the window saturates to exactly 100. A window with no price
/// movement at all has no RSI.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() < 2 {
        return out;
    }

    let decay = 1.0 - 1.0 / period as f64;
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    let mut weight = 0.0;

    for i in 0..prices.len() {
        let change = if i == 0 { 0.0 } else { prices[i] - prices[i - 1] };

        gain_sum = gain_sum * decay + change.max(0.0);
        loss_sum = loss_sum * decay + (-change).max(0.0);
        weight = weight * decay + 1.0;

        if i >= period {
            out[i] = rsi_from_averages(gain_sum / weight, loss_sum / weight);
        }
    }

    out
}

/// Latest RSI value, if defined
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    rsi_series(prices, period).last().copied().flatten()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return None;
        }
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - (100.0 / (1.0 + rs));

    Some(rsi.clamp(0.0, 100.0))
}
