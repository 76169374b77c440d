pub mod news;
pub mod openai;
pub mod reddit;
pub mod upbit;

pub use news::{CryptoPanicConfig, NewsClient};
pub use openai::OpenAiScorer;
pub use reddit::RedditClient;
pub use upbit::UpbitClient;

use crate::models::PriceSeries;
use crate::Result;
use std::future::Future;

/// Source of OHLCV bars for one instrument, returned oldest to newest
pub trait MarketDataSource {
    fn fetch_bars(
        &self,
        instrument: &str,
        timeframe: &str,
        limit: usize,
    ) -> impl Future<Output = Result<PriceSeries>> + Send;
}
