// Allocation strategy module
pub mod signal_ratio;

pub use signal_ratio::{SignalRatioConfig, SignalRatioPolicy};

use rust_decimal::Decimal;

/// Turns the latest signals into the fraction of portfolio value that should
/// be held in the asset.
pub trait AllocationPolicy: Send + Sync {
    /// Target ratio in [0, 1]
    fn target_ratio(&self, rsi: Option<f64>, sentiment: f64) -> Decimal;

    /// Get policy name
    fn name(&self) -> &str;
}
