//! OpenAI-compatible chat client and the LLM-backed oracles.
//!
//! [`ChatClient`] is the transport: one `POST /chat/completions` per call,
//! run under the shared [`RetryPolicy`]. [`LlmClient`] builds prompts on
//! top of it and implements [`ScoreOracle`], [`BatchRelevanceOracle`],
//! [`TopicOracle`], and [`StoryExtractor`].
//!
//! All response parsing is done by the free functions at the bottom of
//! this module so it can be tested without a network.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{FunnelError, Result};
use crate::oracle::{
    BatchRelevanceOracle, ExtractedStory, ScoreDimension, ScoreOracle, ScoreReport,
    StoryExtractor, TopicOracle, TopicPrompt,
};
use crate::retry::RetryPolicy;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const AUDIENCE: &str = "a channel about surprising history, science, nature, and unexplained events";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            response_format: None,
            temperature: None,
        }
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Ask for a single JSON object as the reply.
    pub fn json(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object",
        });
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Transport for any OpenAI-compatible chat completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    service: &'static str,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(
        service: &'static str,
        api_key: String,
        url: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FunnelError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            url,
            service,
            retry,
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        debug!(service = self.service, model = %request.model, "chat request");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| FunnelError::from_http(self.service, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FunnelError::from_status(self.service, status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| FunnelError::from_http(self.service, e))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FunnelError::malformed(self.service, "no message content in response"))
    }

    /// Send `request` and return the first choice's text.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.retry
            .run(self.service, move || self.send(request))
            .await
    }

    /// Send `request` and parse the reply as a JSON value.
    pub async fn complete_json(&self, request: &ChatRequest) -> Result<Value> {
        let content = self.complete(request).await?;
        parse_json_content(self.service, &content)
    }
}

/// LLM-backed oracles. Requires `OPENAI_API_KEY`.
pub struct LlmClient {
    chat: ChatClient,
    model_mini: String,
    model_main: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| FunnelError::config("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_CHAT_URL.to_string());
        Ok(Self {
            chat: ChatClient::new(
                "llm",
                api_key,
                url,
                Duration::from_secs(config.timeout_secs),
                retry,
            )?,
            model_mini: config.model_mini.clone(),
            model_main: config.model_main.clone(),
        })
    }

    fn mini(&self, system: String, user: String) -> ChatRequest {
        ChatRequest::new(&self.model_mini)
            .message(ChatMessage::system(system))
            .message(ChatMessage::user(user))
            .json()
    }
}

fn score_prompt(dimension: ScoreDimension) -> String {
    match dimension {
        ScoreDimension::Virality => format!(
            "Rate from 0 to 100 how likely this story is to be widely shared on social media. \
             Respond with JSON: {{\"{}\": integer, \"{}\": string}}.",
            dimension.score_field(),
            dimension.rationale_field()
        ),
        ScoreDimension::Brand => format!(
            "Rate from 0 to 100 how well this story fits {AUDIENCE}. \
             Also list up to 3 specific sub-topics worth searching for related stories. \
             Respond with JSON: {{\"{}\": integer, \"{}\": string, \"new_topics\": [string]}}.",
            dimension.score_field(),
            dimension.rationale_field()
        ),
    }
}

#[async_trait]
impl ScoreOracle for LlmClient {
    async fn score(
        &self,
        dimension: ScoreDimension,
        title: &str,
        summary: &str,
    ) -> Result<ScoreReport> {
        let request = ChatRequest::new(&self.model_main)
            .message(ChatMessage::system(score_prompt(dimension)))
            .message(ChatMessage::user(format!(
                "Title: {}\nSummary: {}",
                title, summary
            )))
            .json()
            .temperature(0.2);
        let value = self.chat.complete_json(&request).await?;
        parse_score_report(&value, dimension)
    }
}

#[async_trait]
impl BatchRelevanceOracle for LlmClient {
    async fn filter(&self, titles: &[String]) -> Result<Vec<i64>> {
        let listing: Vec<String> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i, t))
            .collect();
        let request = self.mini(
            format!(
                "You screen headlines for {AUDIENCE}. Be permissive: keep anything that could \
                 plausibly interest that audience. Respond with JSON: \
                 {{\"passed_indices\": [integer]}} listing the numbers of headlines to keep."
            ),
            listing.join("\n"),
        );
        let value = self.chat.complete_json(&request).await?;
        parse_indices(&value)
    }
}

#[async_trait]
impl TopicOracle for LlmClient {
    async fn topics(&self, prompt: TopicPrompt<'_>) -> Result<Vec<String>> {
        let request = match prompt {
            TopicPrompt::BroadQueries { count, year } => self.mini(
                format!(
                    "Generate {count} broad web search queries that tend to return lists of \
                     recent surprising discoveries, each from a different domain (history, \
                     archaeology, space, biology, geology, oceans, technology). Anchor them to \
                     {year}. Respond with JSON: {{\"queries\": [string]}}."
                ),
                format!("Generate {} queries.", count),
            ),
            TopicPrompt::Intersections { count } => self.mini(
                format!(
                    "Invent {count} unusual intersections that pair two unrelated fields, \
                     written as \"Field A + Field B\". Respond with JSON: \
                     {{\"intersections\": [string]}}."
                ),
                format!("Invent {} intersections.", count),
            ),
            TopicPrompt::ConcreteQueries {
                intersections,
                year,
            } => self.mini(
                format!(
                    "For each intersection, write one concrete web search query likely to \
                     surface real news stories from {year}. Keep the input order. Respond with \
                     JSON: {{\"queries\": [string]}}."
                ),
                intersections.join("\n"),
            ),
        };
        let value = self.chat.complete_json(&request).await?;
        normalize_string_list(&value, &["queries", "intersections", "topics"])
    }
}

#[async_trait]
impl StoryExtractor for LlmClient {
    async fn search_query(&self, topic: &str, year: i32) -> Result<String> {
        let request = self.mini(
            "Write one focused web search query that finds recent news stories about the \
             topic. Respond with JSON: {\"query\": string}."
                .to_string(),
            format!("Topic: {}\nYear: {}", topic, year),
        );
        let value = self.chat.complete_json(&request).await?;
        let query = value
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| FunnelError::malformed("llm", "missing query"))?;
        Ok(rewrite_year(query, year))
    }

    async fn extract_stories(&self, raw: &str) -> Result<Vec<ExtractedStory>> {
        let request = self.mini(
            "Extract every distinct news story from the text. Only include stories that have a \
             source URL. Respond with JSON: \
             {\"stories\": [{\"title\": string, \"url\": string, \"summary\": string}]}."
                .to_string(),
            raw.to_string(),
        );
        let value = self.chat.complete_json(&request).await?;
        parse_stories(&value)
    }
}

/// Parse a model reply as JSON, tolerating markdown code fences.
pub fn parse_json_content(service: &str, content: &str) -> Result<Value> {
    let stripped = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(stripped).map_err(|e| FunnelError::malformed(service, e))
}

/// Read a score out of an oracle reply.
///
/// A missing or unreadable score is 0. Integers, floats, and numeric
/// strings are accepted; the result is clamped to `0..=100`.
pub fn parse_score_report(value: &Value, dimension: ScoreDimension) -> Result<ScoreReport> {
    let obj = value
        .as_object()
        .ok_or_else(|| FunnelError::malformed("scoring", "reply is not a JSON object"))?;

    let score = obj
        .get(dimension.score_field())
        .or_else(|| obj.get("score"))
        .map(score_value)
        .unwrap_or(0);

    let rationale = obj
        .get(dimension.rationale_field())
        .or_else(|| obj.get("rationale"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let new_topics = match obj.get("new_topics") {
        Some(v) => normalize_string_list(v, &["topics"]).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(ScoreReport {
        score,
        rationale,
        new_topics,
    })
}

fn score_value(value: &Value) -> i64 {
    let raw = match value {
        Value::Number(n) => n.as_i64().map(|i| i as f64).or_else(|| n.as_f64()),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(f) if f.is_finite() => (f.round() as i64).clamp(0, 100),
        _ => 0,
    }
}

/// Read `passed_indices` out of a gatekeeper reply. Non-integer entries
/// are dropped; range checking is the caller's job.
pub fn parse_indices(value: &Value) -> Result<Vec<i64>> {
    let items = value
        .get("passed_indices")
        .and_then(Value::as_array)
        .ok_or_else(|| FunnelError::malformed("gatekeeper", "missing passed_indices"))?;
    Ok(items.iter().filter_map(Value::as_i64).collect())
}

/// Normalize "a list, or an object holding a list" into a list of strings.
///
/// For objects, the first key in `preferred` that holds an array wins,
/// then any array-valued field. Anything else is a malformed response.
pub fn normalize_string_list(value: &Value, preferred: &[&str]) -> Result<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => preferred
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(Value::as_array)
            .or_else(|| map.values().find_map(Value::as_array))
            .ok_or_else(|| FunnelError::malformed("llm", "no list in reply"))?,
        _ => return Err(FunnelError::malformed("llm", "reply is neither a list nor an object")),
    };

    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Read `{"stories": [...]}`. A reply with no `stories` key means none were found.
pub fn parse_stories(value: &Value) -> Result<Vec<ExtractedStory>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("stories").and_then(Value::as_array) {
            Some(items) => items,
            None => return Ok(Vec::new()),
        },
        _ => return Err(FunnelError::malformed("llm", "stories reply is not JSON object")),
    };
    Ok(items
        .iter()
        .filter_map(|item| serde_json::from_value::<ExtractedStory>(item.clone()).ok())
        .collect())
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b20\d{2}\b").expect("valid year regex"))
}

/// Point a search query at `year`: stale `20xx` years are replaced, and
/// the year is appended when the query names none.
pub fn rewrite_year(query: &str, year: i32) -> String {
    let year_str = year.to_string();
    let rewritten = year_re().replace_all(query.trim(), year_str.as_str()).into_owned();
    if rewritten.contains(&year_str) {
        rewritten
    } else {
        format!("{} {}", rewritten, year_str)
    }
}
