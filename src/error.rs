use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the trading cycle.
///
/// Business-rule outcomes (insufficient balance, orders below the minimum,
/// oversized sells) are never errors; they resolve to holds or clamps inside
/// the rebalancer. What remains is either a collaborator/storage failure the
/// loop can retry, or a contract violation that must stop the process.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("market data unavailable: {0}")]
    MarketData(String),

    #[error("sentiment collaborator failed: {0}")]
    Sentiment(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("corrupt {table} record {id}: {reason}")]
    CorruptRecord {
        table: &'static str,
        id: i64,
        reason: String,
    },

    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("target ratio must be within [0, 1], got {0}")]
    InvalidTargetRatio(Decimal),

    #[error("price series is empty")]
    EmptySeries,
}

impl BotError {
    /// Whether the cycle loop may log this error and try again next interval.
    pub fn is_recoverable(&self) -> bool {
        match self {
            BotError::MarketData(_)
            | BotError::Sentiment(_)
            | BotError::Http(_)
            | BotError::Storage(_)
            | BotError::EmptySeries => true,
            BotError::Migration(_)
            | BotError::Config(_)
            | BotError::CorruptRecord { .. }
            | BotError::InvalidPrice(_)
            | BotError::InvalidTargetRatio(_) => false,
        }
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_collaborator_failures_are_recoverable() {
        assert!(BotError::MarketData("timeout".into()).is_recoverable());
        assert!(BotError::Sentiment("429".into()).is_recoverable());
        assert!(BotError::Storage(sqlx::Error::PoolTimedOut).is_recoverable());
        assert!(BotError::EmptySeries.is_recoverable());
    }

    #[test]
    fn test_contract_violations_are_fatal() {
        assert!(!BotError::InvalidPrice(dec!(0)).is_recoverable());
        assert!(!BotError::InvalidTargetRatio(dec!(1.5)).is_recoverable());
        let corrupt = BotError::CorruptRecord {
            table: "trade_logs",
            id: 7,
            reason: "bad decimal".into(),
        };
        assert!(!corrupt.is_recoverable());
        assert_eq!(corrupt.to_string(), "corrupt trade_logs record 7: bad decimal");
    }
}
