// Paper ledger, order sizing and the cycle loop
pub mod engine;
pub mod ledger;
pub mod rebalancer;

pub use engine::{CycleReport, TradingEngine};
pub use ledger::{Ledger, LedgerState};
pub use rebalancer::{RebalanceConfig, RebalanceInput, RebalanceOutcome, Rebalancer, QUANTITY_DP};
