//! News sentiment from an OpenAI-compatible chat completion endpoint
//! (DashScope's compatible mode serves Qwen this way).

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use common::models::{NewsItem, ProcessedData, RawAnalyzerOutput, SignalSource};

use crate::scorer::{ScoreError, Scorer, data_kind};

const SYSTEM_PROMPT: &str = "You are a crypto market sentiment analyst. You read Telegram \
channel and group messages and judge the market's direction for the next hour.
Use only the information in the messages. Do not invent numbers, sources or quotes.
Answer with JSON only, no other text:
{
    \"sentiment\": -1.0 to 1.0 (bearish to bullish),
    \"confidence\": 0.0 to 1.0,
    \"summary\": \"one or two sentences on what is happening and why\",
    \"hot_topics\": [\"topic1\", \"topic2\"]
}";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewsVerdict {
    pub sentiment: f64,
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub hot_topics: Vec<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

pub struct LlmNewsScorer {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmNewsScorer {
    pub fn new(client: Client, base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, ScoreError> {
        let api_key = self.api_key.as_deref().ok_or(ScoreError::MissingApiKey)?;
        let messages = [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ];
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            error!("LLM call failed: {} - {}", status, body);
            return Err(ScoreError::LlmStatus { status, body });
        }

        let answer = resp.json::<ChatResponse>().await?;
        answer
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ScoreError::EmptyAnswer)
    }
}

/// Renders messages as `[channel - date]: text`, skipping empty ones.
pub fn build_prompt(items: &[NewsItem]) -> String {
    let lines: Vec<String> = items
        .iter()
        .filter(|item| !item.text.trim().is_empty())
        .map(|item| format!("[{} - {}]: {}", item.channel, item.date.to_rfc3339(), item.text))
        .collect();
    format!(
        "Analyse the following {} crypto Telegram messages and return the JSON verdict.\n\n{}",
        lines.len(),
        lines.join("\n\n")
    )
}

/// Parses the model's answer, tolerating a surrounding markdown code fence.
pub fn parse_verdict(answer: &str) -> Result<NewsVerdict, ScoreError> {
    let mut body = answer.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    Ok(serde_json::from_str(body.trim())?)
}

#[async_trait]
impl Scorer for LlmNewsScorer {
    fn source(&self) -> SignalSource {
        SignalSource::News
    }

    async fn score(&self, data: &ProcessedData) -> Result<RawAnalyzerOutput, ScoreError> {
        let ProcessedData::News(items) = data else {
            return Err(ScoreError::WrongInput {
                scorer: self.source(),
                got: data_kind(data),
            });
        };
        if items.iter().all(|item| item.text.trim().is_empty()) {
            return Err(ScoreError::NotEnoughData { needed: 1, got: 0 });
        }

        let answer = self.complete(build_prompt(items)).await?;
        let verdict = parse_verdict(&answer).inspect_err(|e| {
            error!("Failed to parse LLM answer ({}): {}", e, answer);
        })?;
        debug!(
            "News verdict: sentiment={:.2} conf={:.2} topics={:?}",
            verdict.sentiment, verdict.confidence, verdict.hot_topics
        );

        Ok(RawAnalyzerOutput::News {
            sentiment: verdict.sentiment,
            confidence: verdict.confidence,
            summary: verdict.summary,
            observed_at: Utc::now(),
        })
    }
}
