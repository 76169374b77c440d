use crate::api::reddit::clean_text;
use crate::sentiment::CorpusSource;
use crate::{BotError, Result};
use serde::Deserialize;

pub const GOOGLE_NEWS_RSS: &str = "https://news.google.com/rss/search?q=bitcoin";
pub const CRYPTOPANIC_API_BASE: &str = "https://cryptopanic.com";
const USER_AGENT: &str = "paperbot/0.1 (paper trading sentiment collector)";
const MAX_TITLE_LEN: usize = 300;
const MAX_SUMMARY_LEN: usize = 1000;

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    results: Vec<NewsPost>,
}

#[derive(Debug, Deserialize)]
struct NewsPost {
    title: String,
    #[serde(default)]
    body: String,
    source: Option<NewsDomain>,
}

#[derive(Debug, Deserialize)]
struct NewsDomain {
    domain: String,
}

#[derive(Debug, Clone, PartialEq)]
struct FeedItem {
    title: String,
    summary: String,
}

/// CryptoPanic posts API access, only used when a token is configured
#[derive(Debug, Clone)]
pub struct CryptoPanicConfig {
    pub api_key: String,
    pub base_url: String,
    pub currencies: String,
}

/// Collects news headlines from RSS feeds and, with a token, CryptoPanic
pub struct NewsClient {
    client: reqwest::Client,
    feeds: Vec<String>,
    items_per_feed: usize,
    cryptopanic: Option<CryptoPanicConfig>,
}

impl NewsClient {
    pub fn new(feeds: Vec<String>, items_per_feed: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            feeds,
            items_per_feed,
            cryptopanic: None,
        }
    }

    pub fn with_cryptopanic(mut self, config: CryptoPanicConfig) -> Self {
        self.cryptopanic = Some(config);
        self
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Sentiment(format!("RSS feed error {} for {}", status, url)));
        }

        let body = response.text().await?;
        let items = parse_rss_items(&body);
        if items.is_empty() {
            tracing::debug!(url, "RSS feed returned no items");
        }

        Ok(items
            .into_iter()
            .take(self.items_per_feed)
            .map(|item| format_headline("RSS", &item.title, &item.summary))
            .collect())
    }

    async fn fetch_cryptopanic(&self, config: &CryptoPanicConfig) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/posts/", config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("auth_token", config.api_key.as_str()),
                ("kind", "news"),
                ("currencies", config.currencies.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Sentiment(format!("CryptoPanic API error {}", status)));
        }

        let posts: PostsResponse = response
            .json()
            .await
            .map_err(|e| BotError::Sentiment(format!("bad CryptoPanic response: {}", e)))?;

        Ok(posts
            .results
            .into_iter()
            .take(self.items_per_feed)
            .map(|post| {
                let label = match &post.source {
                    Some(source) => format!("CryptoPanic {}", source.domain),
                    None => "CryptoPanic".to_string(),
                };
                format_headline(&label, &post.title, &post.body)
            })
            .collect())
    }
}

impl CorpusSource for NewsClient {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn collect(&self) -> Result<Vec<String>> {
        let mut items = Vec::new();

        for feed in &self.feeds {
            match self.fetch_feed(feed).await {
                Ok(headlines) => items.extend(headlines),
                Err(e) => tracing::warn!("Skipping feed {}: {}", feed, e),
            }
        }

        if let Some(config) = &self.cryptopanic {
            match self.fetch_cryptopanic(config).await {
                Ok(headlines) => items.extend(headlines),
                Err(e) => tracing::warn!("Skipping CryptoPanic: {}", e),
            }
        }

        tracing::info!(
            feeds = self.feeds.len(),
            cryptopanic = self.cryptopanic.is_some(),
            headlines = items.len(),
            "Collected news corpus"
        );

        Ok(items)
    }
}

fn format_headline(source: &str, title: &str, summary: &str) -> String {
    let title = clean_text(title, MAX_TITLE_LEN);
    let summary = clean_text(summary, MAX_SUMMARY_LEN);

    if summary.is_empty() || summary == title {
        format!("[{}] {}", source, title)
    } else {
        format!("[{}] {} - {}", source, title, summary)
    }
}

/// `<item>` titles and descriptions of an RSS 2.0 document, in feed order
fn parse_rss_items(xml: &str) -> Vec<FeedItem> {
    let mut items = Vec::new();
    let mut rest = xml;

    while let Some(block) = next_element(rest, "item") {
        rest = block.remaining;
        let Some(title) = next_element(block.inner, "title") else {
            continue;
        };
        let summary = next_element(block.inner, "description")
            .map(|d| decode_text(d.inner))
            .unwrap_or_default();

        items.push(FeedItem {
            title: decode_text(title.inner),
            summary,
        });
    }

    items
}

struct Element<'a> {
    inner: &'a str,
    remaining: &'a str,
}

/// First `<tag ...>...</tag>` in `xml`; attributes are ignored
fn next_element<'a>(xml: &'a str, tag: &str) -> Option<Element<'a>> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search = xml;

    loop {
        let start = search.find(&open)?;
        let after = &search[start + open.len()..];
        // `<itemExtra>` is a different element
        match after.chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r') | Some('/') => {}
            _ => {
                search = after;
                continue;
            }
        }

        let gt = after.find('>')?;
        if after[..gt].ends_with('/') {
            return Some(Element {
                inner: "",
                remaining: &after[gt + 1..],
            });
        }

        let body = &after[gt + 1..];
        let end = body.find(&close)?;
        return Some(Element {
            inner: &body[..end],
            remaining: &body[end + close.len()..],
        });
    }
}

fn decode_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(cdata) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        return cdata.to_string();
    }

    trimmed
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
}
