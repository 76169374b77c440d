/// OpenAI chat-completions sentiment scorer
///
/// Asks the model for a strict JSON verdict on a chunk of collected text and
/// turns it into a SentimentScore. Unparseable answers are retried once, then
/// scored neutral so a bad completion never aborts a cycle.
use crate::models::SentimentScore;
use crate::sentiment::SentimentScorer;
use crate::{BotError, Result};
use serde::{Deserialize, Serialize};

pub const OPENAI_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 300;
const MAX_PARSE_ATTEMPTS: u32 = 2;
const FALLBACK_CONFIDENCE: f64 = 50.0;

const SYSTEM_PROMPT: &str = "You are a helpful crypto market analyst. \
When you respond, you must output valid JSON with no additional text.";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

/// The JSON verdict the model is asked to return
#[derive(Debug, Clone, Deserialize)]
pub struct SentimentVerdict {
    pub sentiment_score: f64,
    pub confidence: f64,
    pub analysis_summary: String,
    pub recommendation: Recommendation,
}

pub struct OpenAiScorer {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiScorer {
    pub fn new(api_key: String, model: &str) -> Self {
        Self::with_base_url(api_key, model, OPENAI_API_BASE)
    }

    pub fn with_base_url(api_key: String, model: &str, base_url: &str) -> Self {
        Self {
            api_key,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn build_prompt(text: &str) -> String {
        format!(
            r#"Please analyze the following text:

"""{}"""

Return your response only in valid JSON format, with no extra text, using this exact schema:

{{
  "sentiment_score": float,          // range -1.0 to +1.0
  "confidence": int,                 // range 0 to 100
  "analysis_summary": "string",      // short comment about the sentiment
  "recommendation": "buy" | "sell" | "hold"
}}

Important rules:
1. Do not include any keys other than the four specified.
2. Output must be valid JSON.
3. Do not include backticks, markdown, or any extra text."#,
            text
        )
    }

    async fn request_completion(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| BotError::Sentiment(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Sentiment(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| BotError::Sentiment(format!("JSON decode error: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BotError::Sentiment("OpenAI returned no choices".to_string()))
    }
}

impl SentimentScorer for OpenAiScorer {
    async fn score(&self, text: &str) -> Result<SentimentScore> {
        let prompt = Self::build_prompt(text);

        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let content = self.request_completion(&prompt).await?;

            match parse_verdict(&content) {
                Ok(verdict) => {
                    tracing::debug!(
                        sentiment = verdict.sentiment_score,
                        confidence = verdict.confidence,
                        recommendation = ?verdict.recommendation,
                        summary = %verdict.analysis_summary,
                        "Scored chunk"
                    );
                    return Ok(SentimentScore {
                        sentiment: verdict.sentiment_score,
                        confidence: verdict.confidence,
                    });
                }
                Err(e) if attempt < MAX_PARSE_ATTEMPTS => {
                    tracing::warn!("JSON parse failed (attempt {}), retrying: {}", attempt, e);
                }
                Err(e) => {
                    tracing::error!(
                        "JSON parse failed after {} attempts, scoring neutral: {}",
                        MAX_PARSE_ATTEMPTS,
                        e
                    );
                }
            }
        }

        Ok(SentimentScore {
            sentiment: 0.0,
            confidence: FALLBACK_CONFIDENCE,
        })
    }
}

/// Parse a completion into a verdict, tolerating markdown code fences
pub fn parse_verdict(content: &str) -> std::result::Result<SentimentVerdict, String> {
    let mut text = content.trim();
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    }

    let verdict: SentimentVerdict =
        serde_json::from_str(text).map_err(|e| format!("invalid verdict JSON: {}", e))?;

    if !verdict.sentiment_score.is_finite() || verdict.sentiment_score.abs() > 1.0 {
        return Err(format!(
            "sentiment_score {} outside [-1, 1]",
            verdict.sentiment_score
        ));
    }
    if !(0.0..=100.0).contains(&verdict.confidence) {
        return Err(format!("confidence {} outside [0, 100]", verdict.confidence));
    }

    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_verdict_plain_and_fenced() {
        let raw = r#"{"sentiment_score": 0.4, "confidence": 70, "analysis_summary": "ok", "recommendation": "buy"}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.sentiment_score, 0.4);
        assert_eq!(verdict.recommendation, Recommendation::Buy);

        let fenced = format!("```json\n{}\n```", raw);
        assert_eq!(parse_verdict(&fenced).unwrap().confidence, 70.0);
    }

    #[test]
    fn test_parse_verdict_rejects_out_of_range() {
        let raw = r#"{"sentiment_score": 1.7, "confidence": 70, "analysis_summary": "", "recommendation": "hold"}"#;
        assert!(parse_verdict(raw).is_err());

        let raw = r#"{"sentiment_score": 0.1, "confidence": 70, "analysis_summary": "", "recommendation": "moon"}"#;
        assert!(parse_verdict(raw).is_err());
    }

    #[tokio::test]
    async fn test_score_returns_model_verdict() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(
                r#"{"sentiment_score": -0.6, "confidence": 85, "analysis_summary": "fear", "recommendation": "sell"}"#,
            ))
            .create_async()
            .await;

        let scorer = OpenAiScorer::with_base_url("test-key".into(), DEFAULT_MODEL, &server.url());
        let score = scorer.score("Bitcoin falls sharply").await.unwrap();

        mock.assert_async().await;
        assert_eq!(score.sentiment, -0.6);
        assert_eq!(score.confidence, 85.0);
    }

    #[tokio::test]
    async fn test_unparseable_answer_falls_back_to_neutral() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion("I think the market looks great!"))
            .expect(MAX_PARSE_ATTEMPTS as usize)
            .create_async()
            .await;

        let scorer = OpenAiScorer::with_base_url("k".into(), DEFAULT_MODEL, &server.url());
        let score = scorer.score("anything").await.unwrap();

        mock.assert_async().await;
        assert_eq!(score.sentiment, 0.0);
        assert_eq!(score.confidence, FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_http_error_is_recoverable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .create_async()
            .await;

        let scorer = OpenAiScorer::with_base_url("k".into(), DEFAULT_MODEL, &server.url());
        let err = scorer.score("anything").await.unwrap_err();

        assert!(matches!(err, BotError::Sentiment(_)));
        assert!(err.is_recoverable());
    }
}
