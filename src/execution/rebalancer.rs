use super::ledger::LedgerState;
use crate::models::{Decision, DecisionRecord, TradeAction, TradeRecord};
use crate::{BotError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decimal places kept on asset quantities. Truncated toward zero.
pub const QUANTITY_DP: u32 = 12;

/// Fee and order-size constraints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RebalanceConfig {
    pub fee_rate: Decimal,
    /// Smallest value deviation worth trading
    pub rebalance_threshold: Decimal,
    pub min_order_amount: Decimal,
    pub max_order_amount: Decimal,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.00139), // Upbit taker fee
            rebalance_threshold: dec!(5000),
            min_order_amount: dec!(5000),
            max_order_amount: dec!(1000000000),
        }
    }
}

/// Market state and signals for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct RebalanceInput {
    pub price: Decimal,
    pub target_ratio: Decimal,
    pub rsi: Option<f64>,
    pub sentiment: f64,
}

/// Result of one evaluation: the next ledger state plus the records to persist.
/// `trade` is present exactly when the decision is buy or sell.
#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub state: LedgerState,
    pub decision: DecisionRecord,
    pub trade: Option<TradeRecord>,
}

impl RebalanceOutcome {
    pub fn fee_paid(&self) -> Decimal {
        self.trade.as_ref().map(|t| t.fee).unwrap_or_default()
    }
}

/// Sizes and executes paper trades toward a target allocation.
///
/// Never fails on business rules: small deviations, undersized orders and
/// oversized sells turn into holds or clamps with a reason. Only a
/// non-positive price or an out-of-range ratio is an error.
#[derive(Debug, Clone, Default)]
pub struct Rebalancer {
    config: RebalanceConfig,
}

struct Fill {
    action: TradeAction,
    amount: Decimal,
    fee: Decimal,
    next: LedgerState,
    notes: Vec<&'static str>,
}

impl Rebalancer {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn rebalance(
        &self,
        ledger: LedgerState,
        input: &RebalanceInput,
        timestamp: DateTime<Utc>,
    ) -> Result<RebalanceOutcome> {
        if input.price <= Decimal::ZERO {
            return Err(BotError::InvalidPrice(input.price));
        }
        if input.target_ratio < Decimal::ZERO || input.target_ratio > Decimal::ONE {
            return Err(BotError::InvalidTargetRatio(input.target_ratio));
        }

        let price = input.price;
        let total_value = ledger.total_value(price);
        let target_value = total_value * input.target_ratio;
        let current_value = ledger.position * price;
        let diff = target_value - current_value;

        let cycle_id = Uuid::new_v4();

        if diff.abs() < self.config.rebalance_threshold {
            let reason = format!(
                "diff {:.2} below rebalance threshold {}",
                diff, self.config.rebalance_threshold
            );
            return Ok(self.hold(ledger, input, cycle_id, timestamp, reason));
        }

        let fill = if diff > Decimal::ZERO {
            self.size_buy(ledger, price, diff)
        } else {
            self.size_sell(ledger, price, current_value, diff.abs())
        };

        let fill = match fill {
            Ok(fill) => fill,
            Err(reason) => return Ok(self.hold(ledger, input, cycle_id, timestamp, reason)),
        };

        let mut reason = format!(
            "paper rebalance ({}), target_ratio={:.2}",
            fill.action, input.target_ratio
        );
        for note in &fill.notes {
            reason.push_str("; ");
            reason.push_str(note);
        }

        tracing::info!(
            action = %fill.action,
            amount = %fill.amount,
            price = %price,
            fee = %fill.fee,
            balance = %fill.next.balance,
            position = %fill.next.position,
            "Paper trade executed"
        );

        let trade = TradeRecord {
            cycle_id,
            timestamp,
            price,
            rsi: input.rsi,
            sentiment: input.sentiment,
            action: fill.action,
            trade_amount: fill.amount,
            trade_price: price,
            fee: fill.fee,
            resulting_balance: fill.next.balance,
            resulting_position: fill.next.position,
            reason: reason.clone(),
        };

        let decision = DecisionRecord {
            cycle_id,
            timestamp,
            price,
            rsi: input.rsi,
            sentiment: input.sentiment,
            target_ratio: input.target_ratio,
            decision: fill.action.into(),
            reason,
        };

        Ok(RebalanceOutcome {
            state: fill.next,
            decision,
            trade: Some(trade),
        })
    }

    fn size_buy(
        &self,
        ledger: LedgerState,
        price: Decimal,
        diff: Decimal,
    ) -> std::result::Result<Fill, String> {
        let fee_rate = self.config.fee_rate;
        let mut notes = Vec::new();

        let mut buy_cost = diff * (Decimal::ONE + fee_rate);
        if buy_cost < self.config.min_order_amount {
            return Err(format!(
                "buy cost {:.2} below minimum order {}",
                buy_cost, self.config.min_order_amount
            ));
        }

        // The cap applies to the order value; the fee comes on top.
        if diff > self.config.max_order_amount {
            buy_cost = self.config.max_order_amount * (Decimal::ONE + fee_rate);
            notes.push("capped at max order amount");
        }

        if buy_cost > ledger.balance {
            tracing::warn!(
                requested = %buy_cost,
                balance = %ledger.balance,
                "Insufficient balance, buying with all available cash"
            );
            buy_cost = ledger.balance;
            notes.push("insufficient balance, spent all available cash");
        }

        // Fee is taken once, from the cash spent.
        let amount = truncate_quantity(buy_cost * (Decimal::ONE - fee_rate) / price);
        if amount.is_zero() {
            return Err("buy quantity rounds to zero".to_string());
        }

        Ok(Fill {
            action: TradeAction::Buy,
            amount,
            fee: buy_cost * fee_rate,
            next: LedgerState::new(ledger.balance - buy_cost, ledger.position + amount),
            notes,
        })
    }

    fn size_sell(
        &self,
        ledger: LedgerState,
        price: Decimal,
        current_value: Decimal,
        requested: Decimal,
    ) -> std::result::Result<Fill, String> {
        let fee_rate = self.config.fee_rate;
        let mut notes = Vec::new();

        let mut sell_value = requested;
        if sell_value > current_value {
            tracing::warn!(
                requested = %sell_value,
                held = %current_value,
                "Sell exceeds holdings, liquidating position"
            );
            sell_value = current_value;
            notes.push("sell exceeds holdings, liquidating position");
        }

        if sell_value > self.config.max_order_amount {
            sell_value = self.config.max_order_amount;
            notes.push("capped at max order amount");
        }

        let amount = if sell_value >= current_value {
            ledger.position
        } else {
            truncate_quantity(sell_value / price).min(ledger.position)
        };
        if amount.is_zero() {
            return Err("sell quantity rounds to zero".to_string());
        }

        // Fee applies to what was actually sold, after clamping.
        let gross = amount * price;
        let receive = gross * (Decimal::ONE - fee_rate);

        Ok(Fill {
            action: TradeAction::Sell,
            amount,
            fee: gross - receive,
            next: LedgerState::new(ledger.balance + receive, ledger.position - amount),
            notes,
        })
    }

    fn hold(
        &self,
        ledger: LedgerState,
        input: &RebalanceInput,
        cycle_id: Uuid,
        timestamp: DateTime<Utc>,
        reason: String,
    ) -> RebalanceOutcome {
        tracing::info!(reason = %reason, "Holding");

        RebalanceOutcome {
            state: ledger,
            decision: DecisionRecord {
                cycle_id,
                timestamp,
                price: input.price,
                rsi: input.rsi,
                sentiment: input.sentiment,
                target_ratio: input.target_ratio,
                decision: Decision::Hold,
                reason,
            },
            trade: None,
        }
    }
}

fn truncate_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICE: Decimal = dec!(50000000);

    fn input(target_ratio: Decimal) -> RebalanceInput {
        RebalanceInput {
            price: PRICE,
            target_ratio,
            rsi: Some(50.0),
            sentiment: 0.0,
        }
    }

    fn rebalance(ledger: LedgerState, input: RebalanceInput) -> RebalanceOutcome {
        Rebalancer::default()
            .rebalance(ledger, &input, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_buy_toward_half_allocation() {
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = rebalance(ledger, input(dec!(0.5)));

        assert_eq!(outcome.decision.decision, Decision::Buy);
        let trade = outcome.trade.expect("buy should produce a trade");
        assert_eq!(trade.action, TradeAction::Buy);
        assert_eq!(trade.cycle_id, outcome.decision.cycle_id);

        // buy_cost = 500,000 * 1.00139 = 500,695
        assert_eq!(outcome.state.balance, dec!(499305));
        // 500,695 * 0.99861 / 50,000,000
        assert_eq!(outcome.state.position, dec!(0.009999980679));
        assert_eq!(trade.trade_amount, dec!(0.009999980679));
        assert_eq!(trade.resulting_balance, outcome.state.balance);
        assert_eq!(trade.resulting_position, outcome.state.position);
        assert_eq!(trade.reason, outcome.decision.reason);
    }

    #[test]
    fn test_small_diff_holds() {
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = rebalance(ledger, input(dec!(0.0003)));

        // diff = 300 < 5000
        assert_eq!(outcome.decision.decision, Decision::Hold);
        assert!(outcome.decision.reason.contains("below rebalance threshold"));
        assert!(outcome.trade.is_none());
        assert_eq!(outcome.state, ledger);
    }

    #[test]
    fn test_full_liquidation_leaves_zero_position() {
        let ledger = LedgerState::new(Decimal::ZERO, dec!(0.01));
        let outcome = rebalance(ledger, input(Decimal::ZERO));

        assert_eq!(outcome.decision.decision, Decision::Sell);
        assert_eq!(outcome.state.position, Decimal::ZERO);
        assert_eq!(outcome.state.balance, dec!(499305));
        assert_eq!(outcome.trade.unwrap().trade_amount, dec!(0.01));
    }

    #[test]
    fn test_full_liquidation_of_odd_quantity() {
        // more decimals than QUANTITY_DP
        let ledger = LedgerState::new(Decimal::ZERO, dec!(0.0123456789012345678));
        let outcome = rebalance(ledger, input(Decimal::ZERO));

        assert_eq!(outcome.state.position, Decimal::ZERO);
        assert!(outcome.state.balance > Decimal::ZERO);
    }

    #[test]
    fn test_below_minimum_order_holds() {
        let config = RebalanceConfig {
            rebalance_threshold: dec!(100),
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(dec!(0.001)), Utc::now())
            .unwrap();

        // diff = 1,000 -> cost 1,001.39 < 5,000
        assert_eq!(outcome.decision.decision, Decision::Hold);
        assert!(outcome.decision.reason.contains("below minimum order"));
        assert!(outcome.trade.is_none());
        assert_eq!(outcome.state, ledger);
    }

    #[test]
    fn test_buy_is_clamped_to_balance() {
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = rebalance(ledger, input(Decimal::ONE));

        // cost would be 1,001,390; only 1,000,000 available
        assert_eq!(outcome.decision.decision, Decision::Buy);
        assert_eq!(outcome.state.balance, Decimal::ZERO);
        assert_eq!(outcome.state.position, dec!(0.0199722));
        assert!(outcome.decision.reason.contains("insufficient balance"));
    }

    #[test]
    fn test_order_capped_at_max_amount() {
        let config = RebalanceConfig {
            max_order_amount: dec!(100000),
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(dec!(0.5)), Utc::now())
            .unwrap();

        // 100,000 order value plus the fee on top
        assert_eq!(outcome.state.balance, dec!(899861));
        assert_eq!(outcome.state.position, dec!(0.001999996135));
        assert!(outcome.decision.reason.contains("max order"));
    }

    #[test]
    fn test_sell_capped_at_max_amount() {
        let config = RebalanceConfig {
            max_order_amount: dec!(100000),
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(Decimal::ZERO, dec!(0.02));
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(dec!(0.5)), Utc::now())
            .unwrap();

        // sells 100,000 worth, the fee comes out of the proceeds
        assert_eq!(outcome.state.position, dec!(0.018));
        assert_eq!(outcome.state.balance, dec!(99861));
        assert!(outcome.decision.reason.contains("max order"));
    }

    #[test]
    fn test_clamped_buy_below_minimum_still_executes() {
        let config = RebalanceConfig {
            rebalance_threshold: dec!(100),
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(dec!(4995), dec!(0.01));
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(Decimal::ONE), Utc::now())
            .unwrap();

        // cost 5,001.94 passes the minimum, then clamps to the 4,995 held
        assert_eq!(outcome.decision.decision, Decision::Buy);
        assert_eq!(outcome.state.balance, Decimal::ZERO);
        assert_eq!(outcome.state.position, dec!(0.010099761139));
        assert!(outcome.decision.reason.contains("insufficient balance"));
    }

    #[test]
    fn test_sell_below_minimum_order_executes() {
        let config = RebalanceConfig {
            rebalance_threshold: dec!(100),
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(dec!(1000000), dec!(0.001));
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(dec!(0.045)), Utc::now())
            .unwrap();

        // diff = 47,250 - 50,000 = -2,750, under the 5,000 minimum
        assert_eq!(outcome.decision.decision, Decision::Sell);
        assert_eq!(outcome.state.position, dec!(0.000945));
        assert_eq!(outcome.state.balance, dec!(1002746.1775));
    }

    #[test]
    fn test_partial_sell() {
        let ledger = LedgerState::new(Decimal::ZERO, dec!(0.02));
        let outcome = rebalance(ledger, input(dec!(0.5)));

        // diff = -500,000 -> sell 0.01
        assert_eq!(outcome.decision.decision, Decision::Sell);
        assert_eq!(outcome.state.position, dec!(0.01));
        assert_eq!(outcome.state.balance, dec!(499305));
        assert_eq!(outcome.fee_paid(), dec!(695));
    }

    #[test]
    fn test_value_never_increases() {
        let ledgers = [
            LedgerState::new(dec!(1000000), Decimal::ZERO),
            LedgerState::new(Decimal::ZERO, dec!(0.0377)),
            LedgerState::new(dec!(333333.33), dec!(0.004321)),
            LedgerState::new(dec!(12345), dec!(0.1)),
        ];
        let ratios = [dec!(0), dec!(0.3), dec!(0.5), dec!(0.7), dec!(1)];
        let prices = [dec!(49876543.21), dec!(50000000), dec!(1234.5)];

        for ledger in ledgers {
            for ratio in ratios {
                for price in prices {
                    let input = RebalanceInput {
                        price,
                        target_ratio: ratio,
                        rsi: None,
                        sentiment: 0.0,
                    };
                    let outcome = Rebalancer::default()
                        .rebalance(ledger, &input, Utc::now())
                        .unwrap();

                    let before = ledger.total_value(price);
                    let after = outcome.state.total_value(price);
                    assert!(after <= before, "value grew: {} -> {}", before, after);
                    assert!(outcome.state.balance >= Decimal::ZERO);
                    assert!(outcome.state.position >= Decimal::ZERO);
                    assert_eq!(outcome.trade.is_some(), outcome.decision.decision.is_trade());

                    if outcome.trade.is_some() {
                        assert!(after < before, "fee must reduce value");
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_fee_conserves_value_exactly() {
        let config = RebalanceConfig {
            fee_rate: Decimal::ZERO,
            ..RebalanceConfig::default()
        };
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let outcome = Rebalancer::new(config)
            .rebalance(ledger, &input(dec!(0.5)), Utc::now())
            .unwrap();

        assert_eq!(outcome.state.position, dec!(0.01));
        assert_eq!(outcome.state.total_value(PRICE), ledger.total_value(PRICE));
    }

    #[test]
    fn test_contract_violations_are_errors() {
        let ledger = LedgerState::new(dec!(1000000), Decimal::ZERO);
        let rebalancer = Rebalancer::default();

        let bad_price = RebalanceInput {
            price: Decimal::ZERO,
            ..input(dec!(0.5))
        };
        assert!(matches!(
            rebalancer.rebalance(ledger, &bad_price, Utc::now()),
            Err(BotError::InvalidPrice(_))
        ));

        assert!(matches!(
            rebalancer.rebalance(ledger, &input(dec!(1.2)), Utc::now()),
            Err(BotError::InvalidTargetRatio(_))
        ));
    }
}
