use crate::models::{Decision, DecisionRecord, TradeAction, TradeRecord};
use crate::{BotError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use uuid::Uuid;

pub const META_LAST_PRICE: &str = "last_price";
pub const META_LAST_SENTIMENT: &str = "last_sentiment";

/// Everything one evaluation cycle writes, committed in a single transaction
#[derive(Debug, Clone)]
pub struct CycleCommit<'a> {
    pub trade: Option<&'a TradeRecord>,
    pub decision: &'a DecisionRecord,
    pub last_price: Decimal,
    /// Only set when the sentiment was refreshed this cycle
    pub refreshed_sentiment: Option<f64>,
}

/// Identifiers assigned to a committed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedIds {
    pub trade_id: Option<i64>,
    pub decision_id: i64,
}

/// Append-only audit log of trades and decisions, plus the meta key-value
/// table for values carried between cycles.
///
/// Trades and decisions draw their ids from one shared sequence, so ids give
/// a global write order across both tables.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    /// Connect and run migrations
    ///
    /// # Arguments
    /// * `database_url` - SQLite URL (e.g., "sqlite://data/trade_logs.db" or "sqlite::memory:")
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BotError::Config(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        // One writer keeps append + read-latest serialised within the process,
        // and an in-memory database is shared by every query.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to audit log at {}", database_url);

        Ok(Self { pool })
    }

    /// Fresh in-memory log, used by tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Persist a whole cycle atomically: the trade (if any), the decision,
    /// the last observed price and a refreshed sentiment.
    pub async fn commit_cycle(&self, commit: CycleCommit<'_>) -> Result<CommittedIds> {
        let mut tx = self.pool.begin().await?;

        let trade_id = match commit.trade {
            Some(trade) => Some(insert_trade(&mut tx, trade).await?),
            None => None,
        };
        let decision_id = insert_decision(&mut tx, commit.decision).await?;

        upsert_meta(&mut tx, META_LAST_PRICE, &commit.last_price.to_string()).await?;
        if let Some(sentiment) = commit.refreshed_sentiment {
            upsert_meta(&mut tx, META_LAST_SENTIMENT, &sentiment.to_string()).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            decision_id,
            trade_id = ?trade_id,
            decision = %commit.decision.decision,
            "Committed cycle to audit log"
        );

        Ok(CommittedIds {
            trade_id,
            decision_id,
        })
    }

    /// Append a single trade record
    pub async fn append_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_trade(&mut tx, trade).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Append a single decision record
    pub async fn append_decision(&self, decision: &DecisionRecord) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_decision(&mut tx, decision).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Most recent trade by id
    pub async fn latest_trade(&self) -> Result<Option<TradeRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, cycle_id, timestamp, current_price, rsi, sentiment, action,
                   trade_amount, trade_price, fee, balance, position, reason
            FROM trade_logs
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| trade_from_row(&row)).transpose()
    }

    /// Most recent decision by id
    pub async fn latest_decision(&self) -> Result<Option<DecisionRecord>> {
        Ok(self.recent_decisions(1).await?.into_iter().next())
    }

    /// Newest decisions first
    pub async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cycle_id, timestamp, current_price, rsi, sentiment,
                   target_ratio, decision, reason
            FROM decision_logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decision_from_row).collect()
    }

    /// Sentiment of the most recent decision
    pub async fn latest_decision_sentiment(&self) -> Result<Option<f64>> {
        let row = sqlx::query("SELECT sentiment FROM decision_logs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<f64, _>("sentiment"))
            .transpose()
            .map_err(Into::into)
    }

    /// Last sentiment carried across cycles.
    ///
    /// Prefers the meta entry written on refresh; falls back to the newest
    /// decision for logs written before the meta entry existed.
    pub async fn last_sentiment(&self) -> Result<Option<f64>> {
        if let Some(value) = self.get_meta(META_LAST_SENTIMENT).await? {
            let sentiment = value.parse::<f64>().map_err(|e| BotError::CorruptRecord {
                table: "meta_info",
                id: 0,
                reason: format!("{} = '{}': {}", META_LAST_SENTIMENT, value, e),
            })?;
            return Ok(Some(sentiment));
        }

        self.latest_decision_sentiment().await
    }

    /// Last observed price
    pub async fn last_price(&self) -> Result<Option<Decimal>> {
        match self.get_meta(META_LAST_PRICE).await? {
            Some(value) => {
                let price = Decimal::from_str(&value).map_err(|e| BotError::CorruptRecord {
                    table: "meta_info",
                    id: 0,
                    reason: format!("{} = '{}': {}", META_LAST_PRICE, value, e),
                })?;
                Ok(Some(price))
            }
            None => Ok(None),
        }
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM meta_info WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_meta(&mut tx, key, value).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn count_trades(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trade_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_decisions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM decision_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn next_id(tx: &mut Transaction<'_, Sqlite>) -> Result<i64> {
    let result = sqlx::query("INSERT INTO audit_sequence DEFAULT VALUES")
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_trade(tx: &mut Transaction<'_, Sqlite>, trade: &TradeRecord) -> Result<i64> {
    let id = next_id(tx).await?;

    sqlx::query(
        r#"
        INSERT INTO trade_logs (
            id, cycle_id, timestamp, current_price, rsi, sentiment, action,
            trade_amount, trade_price, fee, balance, position, reason
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(trade.cycle_id.to_string())
    .bind(trade.timestamp)
    .bind(trade.price.to_string())
    .bind(trade.rsi)
    .bind(trade.sentiment)
    .bind(trade.action.as_str())
    .bind(trade.trade_amount.to_string())
    .bind(trade.trade_price.to_string())
    .bind(trade.fee.to_string())
    .bind(trade.resulting_balance.to_string())
    .bind(trade.resulting_position.to_string())
    .bind(&trade.reason)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

async fn insert_decision(
    tx: &mut Transaction<'_, Sqlite>,
    decision: &DecisionRecord,
) -> Result<i64> {
    let id = next_id(tx).await?;

    sqlx::query(
        r#"
        INSERT INTO decision_logs (
            id, cycle_id, timestamp, current_price, rsi, sentiment,
            target_ratio, decision, reason
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(decision.cycle_id.to_string())
    .bind(decision.timestamp)
    .bind(decision.price.to_string())
    .bind(decision.rsi)
    .bind(decision.sentiment)
    .bind(decision.target_ratio.to_string())
    .bind(decision.decision.as_str())
    .bind(&decision.reason)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

async fn upsert_meta(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meta_info (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn corrupt(table: &'static str, id: i64, reason: impl Into<String>) -> BotError {
    BotError::CorruptRecord {
        table,
        id,
        reason: reason.into(),
    }
}

fn decimal_column(row: &SqliteRow, table: &'static str, id: i64, column: &str) -> Result<Decimal> {
    let text: String = row
        .try_get(column)
        .map_err(|e| corrupt(table, id, format!("{}: {}", column, e)))?;

    Decimal::from_str(&text).map_err(|e| corrupt(table, id, format!("{} = '{}': {}", column, text, e)))
}

fn column<'r, T>(row: &'r SqliteRow, table: &'static str, id: i64, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| corrupt(table, id, format!("{}: {}", column, e)))
}

fn uuid_column(row: &SqliteRow, table: &'static str, id: i64, column: &str) -> Result<Uuid> {
    let text: String = row
        .try_get(column)
        .map_err(|e| corrupt(table, id, format!("{}: {}", column, e)))?;

    Uuid::parse_str(&text).map_err(|e| corrupt(table, id, format!("{} = '{}': {}", column, text, e)))
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    const TABLE: &str = "trade_logs";
    let id: i64 = row.try_get("id")?;

    let action_str: String = column(row, TABLE, id, "action")?;
    let action = action_str
        .parse::<TradeAction>()
        .map_err(|e| corrupt(TABLE, id, e))?;

    Ok(TradeRecord {
        cycle_id: uuid_column(row, TABLE, id, "cycle_id")?,
        timestamp: column::<DateTime<Utc>>(row, TABLE, id, "timestamp")?,
        price: decimal_column(row, TABLE, id, "current_price")?,
        rsi: column::<Option<f64>>(row, TABLE, id, "rsi")?,
        sentiment: column::<f64>(row, TABLE, id, "sentiment")?,
        action,
        trade_amount: decimal_column(row, TABLE, id, "trade_amount")?,
        trade_price: decimal_column(row, TABLE, id, "trade_price")?,
        fee: decimal_column(row, TABLE, id, "fee")?,
        resulting_balance: decimal_column(row, TABLE, id, "balance")?,
        resulting_position: decimal_column(row, TABLE, id, "position")?,
        reason: column::<String>(row, TABLE, id, "reason")?,
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<DecisionRecord> {
    const TABLE: &str = "decision_logs";
    let id: i64 = row.try_get("id")?;

    let decision_str: String = column(row, TABLE, id, "decision")?;
    let decision = decision_str
        .parse::<Decision>()
        .map_err(|e| corrupt(TABLE, id, e))?;

    Ok(DecisionRecord {
        cycle_id: uuid_column(row, TABLE, id, "cycle_id")?,
        timestamp: column::<DateTime<Utc>>(row, TABLE, id, "timestamp")?,
        price: decimal_column(row, TABLE, id, "current_price")?,
        rsi: column::<Option<f64>>(row, TABLE, id, "rsi")?,
        sentiment: column::<f64>(row, TABLE, id, "sentiment")?,
        target_ratio: decimal_column(row, TABLE, id, "target_ratio")?,
        decision,
        reason: column::<String>(row, TABLE, id, "reason")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade(balance: Decimal, position: Decimal) -> TradeRecord {
        TradeRecord {
            cycle_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            price: dec!(50000000),
            rsi: Some(42.5),
            sentiment: 0.3,
            action: TradeAction::Buy,
            trade_amount: dec!(0.009999980679),
            trade_price: dec!(50000000),
            fee: dec!(695.96605),
            resulting_balance: balance,
            resulting_position: position,
            reason: "paper rebalance (buy), target_ratio=0.50".to_string(),
        }
    }

    fn sample_decision(decision: Decision, sentiment: f64) -> DecisionRecord {
        DecisionRecord {
            cycle_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            price: dec!(50000000),
            rsi: None,
            sentiment,
            target_ratio: dec!(0.5),
            decision,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_log() {
        let log = AuditLog::in_memory().await.unwrap();

        assert!(log.latest_trade().await.unwrap().is_none());
        assert!(log.latest_decision().await.unwrap().is_none());
        assert!(log.last_sentiment().await.unwrap().is_none());
        assert!(log.last_price().await.unwrap().is_none());
        assert_eq!(log.count_trades().await.unwrap(), 0);
        assert_eq!(log.count_decisions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trade_round_trips_exactly() {
        let log = AuditLog::in_memory().await.unwrap();
        let trade = sample_trade(dec!(499305), dec!(0.009999980679));

        log.append_trade(&trade).await.unwrap();
        let loaded = log.latest_trade().await.unwrap().unwrap();

        assert_eq!(loaded.cycle_id, trade.cycle_id);
        assert_eq!(loaded.resulting_balance, dec!(499305));
        assert_eq!(loaded.resulting_position, dec!(0.009999980679));
        assert_eq!(loaded.fee, trade.fee);
        assert_eq!(loaded.rsi, Some(42.5));
        assert_eq!(loaded.action, TradeAction::Buy);
        assert_eq!(loaded.timestamp, trade.timestamp);
    }

    #[tokio::test]
    async fn test_ids_shared_across_tables() {
        let log = AuditLog::in_memory().await.unwrap();

        let d1 = log
            .append_decision(&sample_decision(Decision::Hold, 0.0))
            .await
            .unwrap();
        let t1 = log
            .append_trade(&sample_trade(dec!(1), dec!(1)))
            .await
            .unwrap();
        let d2 = log
            .append_decision(&sample_decision(Decision::Buy, 0.0))
            .await
            .unwrap();

        assert!(d1 < t1 && t1 < d2);
    }

    #[tokio::test]
    async fn test_latest_trade_is_highest_id() {
        let log = AuditLog::in_memory().await.unwrap();

        log.append_trade(&sample_trade(dec!(100), dec!(1))).await.unwrap();
        log.append_trade(&sample_trade(dec!(200), dec!(2))).await.unwrap();

        let latest = log.latest_trade().await.unwrap().unwrap();
        assert_eq!(latest.resulting_balance, dec!(200));
    }

    #[tokio::test]
    async fn test_commit_cycle_writes_everything() {
        let log = AuditLog::in_memory().await.unwrap();
        let trade = sample_trade(dec!(499305), dec!(0.01));
        let decision = DecisionRecord {
            cycle_id: trade.cycle_id,
            ..sample_decision(Decision::Buy, 0.7)
        };

        let ids = log
            .commit_cycle(CycleCommit {
                trade: Some(&trade),
                decision: &decision,
                last_price: dec!(50000000),
                refreshed_sentiment: Some(0.7),
            })
            .await
            .unwrap();

        assert!(ids.trade_id.unwrap() < ids.decision_id);
        assert_eq!(log.count_trades().await.unwrap(), 1);
        assert_eq!(log.count_decisions().await.unwrap(), 1);
        assert_eq!(log.last_price().await.unwrap(), Some(dec!(50000000)));
        assert_eq!(log.last_sentiment().await.unwrap(), Some(0.7));
    }

    #[tokio::test]
    async fn test_sentiment_meta_only_changes_on_refresh() {
        let log = AuditLog::in_memory().await.unwrap();
        let first = sample_decision(Decision::Hold, 0.6);
        let second = sample_decision(Decision::Hold, 0.6);

        log.commit_cycle(CycleCommit {
            trade: None,
            decision: &first,
            last_price: dec!(100),
            refreshed_sentiment: Some(0.6),
        })
        .await
        .unwrap();

        log.commit_cycle(CycleCommit {
            trade: None,
            decision: &second,
            last_price: dec!(101),
            refreshed_sentiment: None,
        })
        .await
        .unwrap();

        assert_eq!(log.get_meta(META_LAST_SENTIMENT).await.unwrap().as_deref(), Some("0.6"));
        assert_eq!(log.last_price().await.unwrap(), Some(dec!(101)));
    }

    #[tokio::test]
    async fn test_last_sentiment_falls_back_to_decisions() {
        let log = AuditLog::in_memory().await.unwrap();

        log.append_decision(&sample_decision(Decision::Hold, -0.2))
            .await
            .unwrap();
        log.append_decision(&sample_decision(Decision::Hold, 0.4))
            .await
            .unwrap();

        assert_eq!(log.last_sentiment().await.unwrap(), Some(0.4));
    }

    #[tokio::test]
    async fn test_meta_upsert() {
        let log = AuditLog::in_memory().await.unwrap();

        log.set_meta("k", "1").await.unwrap();
        log.set_meta("k", "2").await.unwrap();

        assert_eq!(log.get_meta("k").await.unwrap().as_deref(), Some("2"));
        assert!(log.get_meta("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_trade_is_fatal() {
        let log = AuditLog::in_memory().await.unwrap();
        log.append_trade(&sample_trade(dec!(100), dec!(1))).await.unwrap();

        sqlx::query("UPDATE trade_logs SET balance = 'not-a-number'")
            .execute(log.pool())
            .await
            .unwrap();

        let err = log.latest_trade().await.unwrap_err();
        assert!(matches!(err, BotError::CorruptRecord { table: "trade_logs", .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_corrupt_last_price_is_fatal() {
        let log = AuditLog::in_memory().await.unwrap();
        log.set_meta(META_LAST_PRICE, "abc").await.unwrap();

        let err = log.last_price().await.unwrap_err();
        assert!(!err.is_recoverable());
    }
}
