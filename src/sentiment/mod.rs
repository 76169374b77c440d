// Sentiment collaborators and the refresh gate
pub mod gate;

pub use gate::{GateDecision, SentimentGate};

use crate::api::{NewsClient, OpenAiScorer, RedditClient};
use crate::models::SentimentScore;
use crate::Result;
use std::future::Future;

/// Produces the raw text the scorer reads (news, social posts)
pub trait CorpusSource {
    fn name(&self) -> &'static str {
        "corpus"
    }

    fn collect(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Two corpus sources read back to back.
///
/// A source that fails is logged and skipped, so one outage does not cost the
/// other source's items.
pub struct CombinedCorpus<A, B> {
    first: A,
    second: B,
}

impl<A, B> CombinedCorpus<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> CorpusSource for CombinedCorpus<A, B>
where
    A: CorpusSource + Sync,
    B: CorpusSource + Sync,
{
    async fn collect(&self) -> Result<Vec<String>> {
        let mut items = Vec::new();

        match self.first.collect().await {
            Ok(found) => items.extend(found),
            Err(e) => tracing::warn!("Skipping {} corpus: {}", self.first.name(), e),
        }
        match self.second.collect().await {
            Ok(found) => items.extend(found),
            Err(e) => tracing::warn!("Skipping {} corpus: {}", self.second.name(), e),
        }

        Ok(items)
    }
}

/// Scores one piece of text
pub trait SentimentScorer {
    fn score(&self, text: &str) -> impl Future<Output = Result<SentimentScore>> + Send;
}

/// Anything the engine can ask for a fresh batch of sentiment scores
pub trait SentimentSource {
    fn fetch_scores(&self) -> impl Future<Output = Result<Vec<SentimentScore>>> + Send;
}

/// Mean sentiment and confidence of a batch.
///
/// An empty batch is neutral (0.0, 0.0). Scores are clamped to [-1, 1] first.
pub fn average_sentiment(scores: &[SentimentScore]) -> (f64, f64) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }

    let n = scores.len() as f64;
    let sentiment = scores
        .iter()
        .map(|s| s.sentiment.clamp(-1.0, 1.0))
        .sum::<f64>()
        / n;
    let confidence = scores.iter().map(|s| s.confidence).sum::<f64>() / n;

    (sentiment, confidence)
}

/// Join corpus items into chunks of at most `chunk_size` items
pub fn chunk_corpus(items: &[String], chunk_size: usize) -> Vec<String> {
    items
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// Collects a corpus, splits it into chunks and scores each chunk
pub struct NewsSentiment<C, S> {
    corpus: C,
    scorer: S,
    chunk_size: usize,
}

impl<C, S> NewsSentiment<C, S> {
    pub fn new(corpus: C, scorer: S, chunk_size: usize) -> Self {
        Self {
            corpus,
            scorer,
            chunk_size,
        }
    }
}

impl<C, S> SentimentSource for NewsSentiment<C, S>
where
    C: CorpusSource + Sync,
    S: SentimentScorer + Sync,
{
    async fn fetch_scores(&self) -> Result<Vec<SentimentScore>> {
        let items = self.corpus.collect().await?;
        let chunks = chunk_corpus(&items, self.chunk_size);

        tracing::info!(
            items = items.len(),
            chunks = chunks.len(),
            "Scoring collected corpus"
        );

        let mut scores = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            scores.push(self.scorer.score(chunk).await?);
        }

        Ok(scores)
    }
}

/// Sentiment backends the binary can run with
pub enum SentimentProvider {
    News(NewsSentiment<CombinedCorpus<NewsClient, RedditClient>, OpenAiScorer>),
    /// No scorer configured: every refresh is neutral
    Neutral,
}

impl SentimentSource for SentimentProvider {
    async fn fetch_scores(&self) -> Result<Vec<SentimentScore>> {
        match self {
            SentimentProvider::News(news) => news.fetch_scores().await,
            SentimentProvider::Neutral => Ok(Vec::new()),
        }
    }
}
