use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market shapes for synthetic KRW-BTC style data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady climb with small noise (+5% daily drift)
    Uptrend,
    /// Steady decline with small noise (-5% daily drift)
    Downtrend,
    /// Mean-reverting chop around the starting price
    Sideways,
    /// Large random swings (±3% per bar)
    Volatile,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 4] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "📈 Uptrend",
            MarketScenario::Downtrend => "📉 Downtrend",
            MarketScenario::Sideways => "↔️  Sideways",
            MarketScenario::Volatile => "⚡ Volatile",
        }
    }
}

/// Seeded generator so every run of a scenario sees the same prices
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 50_000_000.0,
            base_volume: 3.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// Generate `num_candles` bars spaced `interval_minutes` apart, ending now
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let start_time = Utc::now() - Duration::minutes(num_candles as i64 * interval_minutes);
        let bars_per_day = 24.0 * 60.0 / interval_minutes as f64;
        let mean_price = self.base_price;
        let floor = self.base_price * 0.2;

        let mut price = self.base_price;
        let mut candles = Vec::with_capacity(num_candles);

        for i in 0..num_candles {
            let step = match scenario {
                MarketScenario::Uptrend => {
                    price * (0.05 / bars_per_day + self.rng.gen_range(-0.002..0.002))
                }
                MarketScenario::Downtrend => {
                    price * (-0.05 / bars_per_day + self.rng.gen_range(-0.002..0.002))
                }
                MarketScenario::Sideways => {
                    (mean_price - price) * 0.1 + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => price * self.rng.gen_range(-0.03..0.03),
            };
            price = (price + step).max(floor);

            let timestamp = start_time + Duration::minutes(i as i64 * interval_minutes);
            candles.push(self.bar_around(price, timestamp));
        }

        candles
    }

    /// OHLCV bar closing at `close` with a little intrabar range
    fn bar_around(&mut self, close: f64, timestamp: DateTime<Utc>) -> Candle {
        let spread = 0.002;
        let high = close * (1.0 + self.rng.gen_range(0.0..spread));
        let low = close * (1.0 - self.rng.gen_range(0.0..spread));
        let open = (close * (1.0 + self.rng.gen_range(-spread..spread))).clamp(low, high);

        Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume: self.base_volume * self.rng.gen_range(0.7..1.3),
        }
    }
}
