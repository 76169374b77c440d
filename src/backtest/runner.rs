use crate::backtest::metrics::BacktestMetrics;
use crate::config::Settings;
use crate::execution::{LedgerState, RebalanceInput, RebalanceOutcome, Rebalancer};
use crate::indicators::{self, IndicatorConfig};
use crate::models::{Candle, PriceSeries};
use crate::strategy::{AllocationPolicy, SignalRatioPolicy};
use crate::{BotError, Result};

/// Replays a candle history through indicators, policy and rebalancer.
///
/// Each step sees only the trailing `window` bars, the same view the live
/// engine gets from `market.candle_limit`. Sentiment is held fixed and the
/// ledger lives in memory; nothing is persisted.
pub struct BacktestRunner {
    rebalancer: Rebalancer,
    policy: Box<dyn AllocationPolicy>,
    indicator_config: IndicatorConfig,
    seed: LedgerState,
    window: usize,
    sentiment: f64,
}

impl BacktestRunner {
    pub fn new(settings: &Settings) -> Self {
        Self {
            rebalancer: Rebalancer::new(settings.trading.rebalance_config()),
            policy: Box::new(SignalRatioPolicy::new(
                settings.trading.base_ratio,
                settings.policy.clone(),
            )),
            indicator_config: settings.indicators.clone(),
            seed: settings.trading.seed_state(),
            window: settings.market.candle_limit.max(1),
            sentiment: 0.0,
        }
    }

    /// Replay with a fixed sentiment score instead of neutral
    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = sentiment.clamp(-1.0, 1.0);
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn AllocationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&self, candles: Vec<Candle>) -> Result<BacktestMetrics> {
        if candles.len() < self.window {
            return Err(BotError::MarketData(format!(
                "Not enough candles for backtest. Need {}, got {}",
                self.window,
                candles.len()
            )));
        }

        let history = PriceSeries::new(candles)?;
        let bars = history.candles();

        tracing::info!(
            "Starting backtest: {} candles, window {}, sentiment {:.2}",
            bars.len(),
            self.window,
            self.sentiment
        );

        let mut state = self.seed;
        let mut outcomes: Vec<RebalanceOutcome> = Vec::with_capacity(bars.len());
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut first_price = None;
        let mut last_price = None;

        for end in self.window..=bars.len() {
            let view = PriceSeries::new(bars[end - self.window..end].to_vec())?;
            let price = view.current_price()?.round_dp(2);
            let snapshot = indicators::compute(&view, &self.indicator_config).latest();
            let target_ratio = self.policy.target_ratio(snapshot.rsi, self.sentiment);

            let input = RebalanceInput {
                price,
                target_ratio,
                rsi: snapshot.rsi,
                sentiment: self.sentiment,
            };
            let timestamp = bars[end - 1].timestamp;
            let outcome = self.rebalancer.rebalance(state, &input, timestamp)?;

            if let Some(trade) = &outcome.trade {
                tracing::debug!(
                    "{} {} @ {} ({})",
                    trade.action,
                    trade.trade_amount,
                    price,
                    trade.reason
                );
            }

            state = outcome.state;
            equity_curve.push(state.total_value(price));
            first_price.get_or_insert(price);
            last_price = Some(price);
            outcomes.push(outcome);
        }

        let first_price = first_price.unwrap_or_default();
        let last_price = last_price.unwrap_or_default();
        let initial_value = self.seed.total_value(first_price);

        let metrics = BacktestMetrics::from_outcomes(
            initial_value,
            first_price,
            last_price,
            &outcomes,
            &equity_curve,
        );

        tracing::info!(
            "Backtest complete: {} trades, return {:+.2}% (buy & hold {:+.2}%)",
            metrics.total_trades(),
            metrics.total_return_pct,
            metrics.buy_and_hold_return_pct
        );

        Ok(metrics)
    }

    /// Run backtest and print report
    pub fn run_and_report(&self, candles: Vec<Candle>, scenario_name: &str) -> Result<BacktestMetrics> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Policy: {}", self.policy.name());
        println!("   Candles: {}", candles.len());
        println!("   Sentiment: {:+.2}", self.sentiment);

        let metrics = self.run(candles)?;
        metrics.print_report();

        Ok(metrics)
    }
}
