use crate::db::AuditLog;
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cash and asset holdings of the paper account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub balance: Decimal,
    pub position: Decimal,
}

impl LedgerState {
    pub fn new(balance: Decimal, position: Decimal) -> Self {
        Self { balance, position }
    }

    /// Mark-to-market value at `price`
    pub fn total_value(&self, price: Decimal) -> Decimal {
        self.balance + self.position * price
    }

    /// Share of value held in the asset at `price`
    pub fn asset_ratio(&self, price: Decimal) -> Decimal {
        let total = self.total_value(price);
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.position * price / total
    }
}

/// Sole owner of the in-memory ledger.
///
/// The ledger is a projection of the audit log: it is rebuilt from the latest
/// trade on startup and is never written to storage itself.
#[derive(Debug)]
pub struct Ledger {
    state: LedgerState,
}

impl Ledger {
    pub fn new(state: LedgerState) -> Self {
        Self { state }
    }

    /// Rebuild from the most recent trade, or start from `seed` if none exists
    pub async fn recover(audit_log: &AuditLog, seed: LedgerState) -> Result<Self> {
        let state = match audit_log.latest_trade().await? {
            Some(trade) => {
                tracing::info!(
                    balance = %trade.resulting_balance,
                    position = %trade.resulting_position,
                    "Recovered ledger from trade log"
                );
                LedgerState::new(trade.resulting_balance, trade.resulting_position)
            }
            None => {
                tracing::info!(
                    balance = %seed.balance,
                    position = %seed.position,
                    "No trade history, using seed ledger"
                );
                seed
            }
        };

        Ok(Self { state })
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// Replace the state with a rebalance result. Only the engine calls this,
    /// after the cycle's records are durably written.
    pub(crate) fn apply(&mut self, next: LedgerState) {
        self.state = next;
    }
}
