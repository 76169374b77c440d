use crate::sentiment::CorpusSource;
use crate::{BotError, Result};
use serde::Deserialize;

pub const REDDIT_API_BASE: &str = "https://www.reddit.com";
const USER_AGENT: &str = "paperbot/0.1 (paper trading sentiment collector)";
const MAX_TITLE_LEN: usize = 300;
const MAX_BODY_LEN: usize = 500;
const TRUNCATED_MARKER: &str = " ...(truncated)";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    score: i64,
}

/// Collects hot posts from a fixed set of subreddits via the public JSON listing
pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
    subreddits: Vec<String>,
    posts_per_subreddit: usize,
}

impl RedditClient {
    pub fn new(subreddits: Vec<String>, posts_per_subreddit: usize) -> Self {
        Self::with_base_url(subreddits, posts_per_subreddit, REDDIT_API_BASE)
    }

    pub fn with_base_url(subreddits: Vec<String>, posts_per_subreddit: usize, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            subreddits,
            posts_per_subreddit,
        }
    }

    async fn fetch_subreddit(&self, subreddit: &str) -> Result<Vec<String>> {
        let url = format!("{}/r/{}/hot.json", self.base_url, subreddit);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .query(&[("limit", self.posts_per_subreddit.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Sentiment(format!(
                "Reddit API error {} for r/{}",
                status, subreddit
            )));
        }

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| BotError::Sentiment(format!("bad listing for r/{}: {}", subreddit, e)))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .take(self.posts_per_subreddit)
            .map(|child| format_post(subreddit, &child.data))
            .collect())
    }
}

impl CorpusSource for RedditClient {
    fn name(&self) -> &'static str {
        "reddit"
    }

    async fn collect(&self) -> Result<Vec<String>> {
        let mut items = Vec::new();

        for subreddit in &self.subreddits {
            match self.fetch_subreddit(subreddit).await {
                Ok(posts) => items.extend(posts),
                Err(e) => tracing::warn!("Skipping r/{}: {}", subreddit, e),
            }
        }

        tracing::info!(
            subreddits = self.subreddits.len(),
            posts = items.len(),
            "Collected reddit corpus"
        );

        Ok(items)
    }
}

fn format_post(subreddit: &str, post: &Post) -> String {
    let title = clean_text(&post.title, MAX_TITLE_LEN);
    let body = clean_text(&post.selftext, MAX_BODY_LEN);

    if body.is_empty() {
        format!("[r/{} score={}] {}", subreddit, post.score, title)
    } else {
        format!("[r/{} score={}] {} - {}", subreddit, post.score, title, body)
    }
}

/// Strip HTML tags and URLs, collapse whitespace and cap the length in chars
pub fn clean_text(raw: &str, max_len: usize) -> String {
    let mut without_tags = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                without_tags.push(' ');
            }
            _ if !in_tag => without_tags.push(c),
            _ => {}
        }
    }

    let text = without_tags
        .split_whitespace()
        .filter(|word| !word.starts_with("http"))
        .collect::<Vec<_>>()
        .join(" ");

    if text.chars().count() > max_len {
        let mut truncated: String = text.chars().take(max_len).collect();
        truncated.push_str(TRUNCATED_MARKER);
        truncated
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn listing(titles: &[&str]) -> String {
        let children: Vec<_> = titles
            .iter()
            .map(|t| serde_json::json!({ "data": { "title": t, "selftext": "", "score": 10 } }))
            .collect();
        serde_json::json!({ "data": { "children": children } }).to_string()
    }

    #[test]
    fn test_clean_text_strips_markup_and_links() {
        let raw = "<p>BTC  breaks\n\nout</p> see https://example.com/x now";
        assert_eq!(clean_text(raw, 100), "BTC breaks out see now");
    }

    #[test]
    fn test_clean_text_truncates() {
        let cleaned = clean_text("abcdefghij", 4);
        assert_eq!(cleaned, "abcd ...(truncated)");
        assert_eq!(clean_text("", 4), "");
    }

    #[tokio::test]
    async fn test_collect_skips_failing_subreddit() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/r/Bitcoin/hot.json")
            .match_query(Matcher::UrlEncoded("limit".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(listing(&["Halving soon", "ETF inflows", "ignored third"]))
            .create_async()
            .await;
        let broken = server
            .mock("GET", "/r/Broken/hot.json")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = RedditClient::with_base_url(
            vec!["Broken".into(), "Bitcoin".into()],
            2,
            &server.url(),
        );
        let items = client.collect().await.unwrap();

        ok.assert_async().await;
        broken.assert_async().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], "[r/Bitcoin score=10] Halving soon");
    }
}
