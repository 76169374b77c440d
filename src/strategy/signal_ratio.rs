use super::AllocationPolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Thresholds and step sizes for the RSI/sentiment ratio adjustments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalRatioConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub rsi_delta: Decimal,
    pub sentiment_bullish: f64,
    pub sentiment_bearish: f64,
    pub sentiment_delta: Decimal,
}

impl Default for SignalRatioConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_delta: dec!(0.1),
            sentiment_bullish: 0.5,
            sentiment_bearish: -0.5,
            sentiment_delta: dec!(0.1),
        }
    }
}

/// Base ratio nudged by RSI and sentiment.
///
/// Adjustments are additive so an oversold market with bullish news leans
/// twice as far as either signal alone. An undefined RSI contributes nothing.
#[derive(Debug, Clone)]
pub struct SignalRatioPolicy {
    base_ratio: Decimal,
    config: SignalRatioConfig,
}

impl SignalRatioPolicy {
    pub fn new(base_ratio: Decimal, config: SignalRatioConfig) -> Self {
        Self { base_ratio, config }
    }

    pub fn base_ratio(&self) -> Decimal {
        self.base_ratio
    }

    pub fn adjust_target_ratio(&self, rsi: Option<f64>, sentiment: f64) -> Decimal {
        let mut ratio = self.base_ratio;

        if let Some(rsi) = rsi {
            if rsi < self.config.rsi_oversold {
                ratio += self.config.rsi_delta;
            } else if rsi > self.config.rsi_overbought {
                ratio -= self.config.rsi_delta;
            }
        }

        if sentiment > self.config.sentiment_bullish {
            ratio += self.config.sentiment_delta;
        } else if sentiment < self.config.sentiment_bearish {
            ratio -= self.config.sentiment_delta;
        }

        ratio.clamp(Decimal::ZERO, Decimal::ONE)
    }
}

impl Default for SignalRatioPolicy {
    fn default() -> Self {
        Self::new(dec!(0.5), SignalRatioConfig::default())
    }
}

impl AllocationPolicy for SignalRatioPolicy {
    fn target_ratio(&self, rsi: Option<f64>, sentiment: f64) -> Decimal {
        self.adjust_target_ratio(rsi, sentiment)
    }

    fn name(&self) -> &str {
        "SignalRatio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_signals_keep_base_ratio() {
        let policy = SignalRatioPolicy::default();
        assert_eq!(policy.adjust_target_ratio(Some(50.0), 0.0), dec!(0.5));
        assert_eq!(policy.adjust_target_ratio(None, 0.5), dec!(0.5)); // threshold is exclusive
    }

    #[test]
    fn test_signals_compound() {
        let policy = SignalRatioPolicy::default();

        assert_eq!(policy.adjust_target_ratio(Some(25.0), 0.8), dec!(0.7));
        assert_eq!(policy.adjust_target_ratio(Some(75.0), -0.8), dec!(0.3));
        assert_eq!(policy.adjust_target_ratio(Some(75.0), 0.8), dec!(0.5));
        assert_eq!(policy.adjust_target_ratio(None, -0.9), dec!(0.4));
    }

    #[test]
    fn test_ratio_is_clamped() {
        let high = SignalRatioPolicy::new(dec!(0.95), SignalRatioConfig::default());
        assert_eq!(high.adjust_target_ratio(Some(10.0), 0.9), Decimal::ONE);

        let low = SignalRatioPolicy::new(dec!(0.05), SignalRatioConfig::default());
        assert_eq!(low.adjust_target_ratio(Some(90.0), -0.9), Decimal::ZERO);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let config = SignalRatioConfig {
            rsi_oversold: 40.0,
            rsi_delta: dec!(0.25),
            ..SignalRatioConfig::default()
        };
        let policy = SignalRatioPolicy::new(dec!(0.5), config);

        assert_eq!(policy.target_ratio(Some(35.0), 0.0), dec!(0.75));
        assert_eq!(policy.name(), "SignalRatio");
    }
}
