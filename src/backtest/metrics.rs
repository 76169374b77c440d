use crate::execution::{LedgerState, RebalanceOutcome};
use crate::models::{Decision, TradeRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance summary of one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Value
    pub initial_value: Decimal,
    pub final_value: Decimal,
    pub total_return_pct: f64,
    /// All-in at the first evaluated price, gross of fees
    pub buy_and_hold_return_pct: f64,
    pub final_state: LedgerState,

    // Activity
    pub cycles: usize,
    pub buys: usize,
    pub sells: usize,
    pub holds: usize,
    pub fees_paid: Decimal,

    // Risk
    pub max_drawdown_pct: f64,

    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    /// Summarise a run from its outcomes and the mark-to-market value after
    /// each cycle
    pub fn from_outcomes(
        initial_value: Decimal,
        first_price: Decimal,
        last_price: Decimal,
        outcomes: &[RebalanceOutcome],
        equity_curve: &[Decimal],
    ) -> Self {
        let final_state = outcomes
            .last()
            .map(|o| o.state)
            .unwrap_or_else(|| LedgerState::new(initial_value, Decimal::ZERO));
        let final_value = equity_curve.last().copied().unwrap_or(initial_value);

        let count = |d: Decision| outcomes.iter().filter(|o| o.decision.decision == d).count();

        Self {
            initial_value,
            final_value,
            total_return_pct: percent_change(initial_value, final_value),
            buy_and_hold_return_pct: percent_change(first_price, last_price),
            final_state,
            cycles: outcomes.len(),
            buys: count(Decision::Buy),
            sells: count(Decision::Sell),
            holds: count(Decision::Hold),
            fees_paid: outcomes.iter().map(RebalanceOutcome::fee_paid).sum(),
            max_drawdown_pct: max_drawdown_pct(equity_curve),
            trades: outcomes.iter().filter_map(|o| o.trade.clone()).collect(),
        }
    }

    pub fn total_trades(&self) -> usize {
        self.buys + self.sells
    }

    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 VALUE");
        println!("  Initial Value:         ₩{}", self.initial_value.round_dp(0));
        println!("  Final Value:           ₩{}", self.final_value.round_dp(0));
        println!("  Total Return:          {:+.2}%", self.total_return_pct);
        println!("  Buy & Hold Return:     {:+.2}%", self.buy_and_hold_return_pct);
        println!(
            "  Final Ledger:          balance ₩{} / position {}",
            self.final_state.balance.round_dp(0),
            self.final_state.position
        );

        println!("\n📈 ACTIVITY");
        println!("  Cycles:                {}", self.cycles);
        println!("  Buys / Sells / Holds:  {} / {} / {}", self.buys, self.sells, self.holds);
        println!("  Fees Paid:             ₩{}", self.fees_paid.round_dp(0));

        println!("\n⚠️  RISK");
        println!("  Max Drawdown:          {:.2}%", self.max_drawdown_pct);
    }
}

fn percent_change(from: Decimal, to: Decimal) -> f64 {
    if from.is_zero() {
        return 0.0;
    }
    ((to - from) / from * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}

/// Largest peak-to-trough decline of the curve, in percent
pub fn max_drawdown_pct(equity_curve: &[Decimal]) -> f64 {
    let mut peak = Decimal::ZERO;
    let mut worst = Decimal::ZERO;

    for &value in equity_curve {
        if value > peak {
            peak = value;
        } else if peak > Decimal::ZERO {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }

    (worst * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}
