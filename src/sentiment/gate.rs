use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub const DEFAULT_THRESHOLD_PERCENT: f64 = 5.0;

/// Whether this cycle should pay for a fresh sentiment score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub refresh: bool,
    /// Price change since the last cycle, in percent. `None` on cold start.
    pub change_percent: Option<f64>,
}

/// Skips the expensive sentiment call unless the price moved enough.
#[derive(Debug, Clone, Copy)]
pub struct SentimentGate {
    threshold_percent: f64,
}

impl SentimentGate {
    pub fn new(threshold_percent: f64) -> Self {
        Self { threshold_percent }
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// Refresh on cold start (no last price, or no sentiment ever scored) or
    /// when |current - last| / last * 100 reaches the threshold.
    pub fn decide(
        &self,
        last_price: Option<Decimal>,
        current_price: Decimal,
        has_prior_sentiment: bool,
    ) -> GateDecision {
        let last = match last_price {
            Some(last) if last > Decimal::ZERO => last,
            _ => {
                return GateDecision {
                    refresh: true,
                    change_percent: None,
                }
            }
        };

        let change_percent = ((current_price - last) / last * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);

        GateDecision {
            refresh: !has_prior_sentiment || change_percent.abs() >= self.threshold_percent,
            change_percent: Some(change_percent),
        }
    }
}

impl Default for SentimentGate {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cold_start_refreshes() {
        let gate = SentimentGate::default();
        let decision = gate.decide(None, dec!(100), true);

        assert!(decision.refresh);
        assert_eq!(decision.change_percent, None);
    }

    #[test]
    fn test_small_move_reuses_sentiment() {
        let gate = SentimentGate::default();
        let decision = gate.decide(Some(dec!(100)), dec!(104.99), true);

        assert!(!decision.refresh);
        assert!((decision.change_percent.unwrap() - 4.99).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_inclusive_both_directions() {
        let gate = SentimentGate::default();

        assert!(gate.decide(Some(dec!(100)), dec!(105), true).refresh);
        assert!(gate.decide(Some(dec!(100)), dec!(95), true).refresh);
        assert!(!gate.decide(Some(dec!(100)), dec!(96), true).refresh);
    }

    #[test]
    fn test_missing_sentiment_forces_refresh() {
        let gate = SentimentGate::default();
        assert!(gate.decide(Some(dec!(100)), dec!(100), false).refresh);
    }

    #[test]
    fn test_custom_threshold() {
        let gate = SentimentGate::new(1.0);
        assert!(gate.decide(Some(dec!(200)), dec!(202), true).refresh);
        assert_eq!(gate.threshold_percent(), 1.0);
    }
}
