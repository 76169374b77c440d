use super::ledger::{Ledger, LedgerState};
use super::rebalancer::{RebalanceInput, Rebalancer};
use crate::api::MarketDataSource;
use crate::config::{MarketSettings, Settings};
use crate::db::{AuditLog, CommittedIds, CycleCommit};
use crate::indicators::{self, IndicatorConfig};
use crate::models::{Decision, TradeRecord};
use crate::sentiment::{average_sentiment, SentimentGate, SentimentSource};
use crate::strategy::{AllocationPolicy, SignalRatioPolicy};
use crate::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

/// What one evaluation cycle observed and did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub price: Decimal,
    pub rsi: Option<f64>,
    pub sentiment: f64,
    pub sentiment_refreshed: bool,
    pub target_ratio: Decimal,
    pub decision: Decision,
    pub reason: String,
    pub trade: Option<TradeRecord>,
    pub state: LedgerState,
    pub ids: CommittedIds,
}

/// Drives the fetch → gate → indicators → rebalance → persist cycle.
///
/// The engine is the single owner of the ledger. A cycle that fails before
/// its commit leaves the ledger, the audit log and the cached price and
/// sentiment untouched.
pub struct TradingEngine<M, S> {
    market: M,
    sentiment_source: S,
    audit_log: AuditLog,
    ledger: Ledger,
    gate: SentimentGate,
    policy: Box<dyn AllocationPolicy>,
    rebalancer: Rebalancer,
    market_settings: MarketSettings,
    indicator_config: IndicatorConfig,
    interval: Duration,
    last_price: Option<Decimal>,
    sentiment: Option<f64>,
}

impl<M, S> TradingEngine<M, S>
where
    M: MarketDataSource,
    S: SentimentSource,
{
    /// Recover the ledger, last price and sticky sentiment from the audit log
    pub async fn bootstrap(
        settings: &Settings,
        market: M,
        sentiment_source: S,
        audit_log: AuditLog,
    ) -> Result<Self> {
        let ledger = Ledger::recover(&audit_log, settings.trading.seed_state()).await?;
        let last_price = audit_log.last_price().await?;
        let sentiment = audit_log.last_sentiment().await?;

        tracing::info!(
            last_price = ?last_price,
            sentiment = ?sentiment,
            "Engine state restored"
        );

        Ok(Self {
            market,
            sentiment_source,
            audit_log,
            ledger,
            gate: SentimentGate::new(settings.sentiment.threshold_percent),
            policy: Box::new(SignalRatioPolicy::new(
                settings.trading.base_ratio,
                settings.policy.clone(),
            )),
            rebalancer: Rebalancer::new(settings.trading.rebalance_config()),
            market_settings: settings.market.clone(),
            indicator_config: settings.indicators.clone(),
            interval: Duration::from_secs(settings.engine.interval_secs),
            last_price,
            sentiment,
        })
    }

    /// Override the sleep between cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Swap the allocation policy
    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn ledger_state(&self) -> LedgerState {
        self.ledger.state()
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn sentiment(&self) -> Option<f64> {
        self.sentiment
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    /// Run one evaluation cycle and persist its records atomically
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let series = self
            .market
            .fetch_bars(
                &self.market_settings.instrument,
                &self.market_settings.timeframe,
                self.market_settings.candle_limit,
            )
            .await?;
        let price = series.current_price()?;

        let gate = self
            .gate
            .decide(self.last_price, price, self.sentiment.is_some());

        let (sentiment, refreshed) = if gate.refresh {
            let scores = self.sentiment_source.fetch_scores().await?;
            let (sentiment, confidence) = average_sentiment(&scores);
            tracing::info!(
                change_percent = ?gate.change_percent,
                scores = scores.len(),
                sentiment,
                confidence,
                "🔄 Sentiment refreshed"
            );
            (sentiment, Some(sentiment))
        } else {
            tracing::debug!(
                change_percent = ?gate.change_percent,
                "Price move below gate threshold, reusing sentiment"
            );
            (self.sentiment.unwrap_or(0.0), None)
        };

        let snapshot = indicators::compute(&series, &self.indicator_config).latest();
        let target_ratio = self.policy.target_ratio(snapshot.rsi, sentiment);

        let input = RebalanceInput {
            price,
            target_ratio,
            rsi: snapshot.rsi,
            sentiment,
        };
        let outcome = self
            .rebalancer
            .rebalance(self.ledger.state(), &input, Utc::now())?;

        let ids = self
            .audit_log
            .commit_cycle(CycleCommit {
                trade: outcome.trade.as_ref(),
                decision: &outcome.decision,
                last_price: price,
                refreshed_sentiment: refreshed,
            })
            .await?;

        self.ledger.apply(outcome.state);
        self.last_price = Some(price);
        if refreshed.is_some() {
            self.sentiment = refreshed;
        }

        let decision = &outcome.decision;
        tracing::info!(
            %price,
            rsi = ?snapshot.rsi,
            sma = ?snapshot.sma,
            macd_histogram = ?snapshot.macd.map(|m| m.histogram),
            sentiment,
            %target_ratio,
            decision = %decision.decision,
            balance = %outcome.state.balance,
            position = %outcome.state.position,
            "📊 Cycle complete: {}",
            decision.reason
        );

        Ok(CycleReport {
            cycle_id: decision.cycle_id,
            price,
            rsi: snapshot.rsi,
            sentiment,
            sentiment_refreshed: refreshed.is_some(),
            target_ratio,
            decision: decision.decision,
            reason: decision.reason.clone(),
            trade: outcome.trade,
            state: outcome.state,
            ids,
        })
    }

    /// Run cycles every interval until Ctrl+C
    pub async fn run_forever(&mut self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Run cycles every interval until `shutdown` resolves.
    ///
    /// Recoverable failures abandon the cycle and retry after the interval;
    /// fatal ones stop the loop and are returned. Shutdown is only observed
    /// between cycles, never in the middle of one.
    pub async fn run_until<F: Future>(&mut self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        let mut cycles: u64 = 0;

        loop {
            cycles += 1;
            match self.run_cycle().await {
                Ok(report) => {
                    tracing::debug!(cycle = cycles, decision = %report.decision, "Cycle ok");
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(cycle = cycles, "⚠️  Cycle abandoned: {}", e);
                }
                Err(e) => {
                    tracing::error!(cycle = cycles, "❌ Fatal error, stopping: {}", e);
                    return Err(e);
                }
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = &mut shutdown => {
                    tracing::info!(cycles, "🛑 Shutdown requested, stopping after {} cycles", cycles);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, PriceSeries, SentimentScore};
    use crate::BotError;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyMarket {
        calls: AtomicUsize,
        fail_first: usize,
        close: f64,
    }

    impl MarketDataSource for FlakyMarket {
        async fn fetch_bars(&self, _: &str, _: &str, _: usize) -> Result<PriceSeries> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(BotError::MarketData("timeout".into()));
            }
            PriceSeries::new(vec![Candle {
                timestamp: DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::minutes(call as i64),
                open: self.close,
                high: self.close,
                low: self.close,
                close: self.close,
                volume: 1.0,
            }])
        }
    }

    struct Quiet;

    impl SentimentSource for Quiet {
        async fn fetch_scores(&self) -> Result<Vec<SentimentScore>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_run_until_survives_recoverable_errors() {
        let market = FlakyMarket {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            close: 50_000_000.0,
        };
        let log = AuditLog::in_memory().await.unwrap();
        let mut engine = TradingEngine::bootstrap(&Settings::default(), market, Quiet, log.clone())
            .await
            .unwrap()
            .with_interval(Duration::from_millis(5));

        engine
            .run_until(sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        // Failed cycles write nothing; every successful one writes one decision
        let calls = engine.market.calls.load(Ordering::SeqCst);
        assert!(calls >= 3);
        assert_eq!(log.count_decisions().await.unwrap(), calls as i64 - 2);
        assert_eq!(engine.last_price(), Some(Decimal::from(50_000_000)));
    }

    #[tokio::test]
    async fn test_run_until_stops_on_fatal_error() {
        let market = FlakyMarket {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            close: 0.0,
        };
        let log = AuditLog::in_memory().await.unwrap();
        let mut engine = TradingEngine::bootstrap(&Settings::default(), market, Quiet, log.clone())
            .await
            .unwrap();

        let err = engine
            .run_until(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::InvalidPrice(_)));
        assert_eq!(log.count_decisions().await.unwrap(), 0);
    }
}
