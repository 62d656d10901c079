//! Web-grounded search via the Perplexity chat completions API.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::SearchConfig;
use crate::error::{FunnelError, Result};
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::oracle::SearchOracle;
use crate::retry::RetryPolicy;

const PERPLEXITY_CHAT_URL: &str = "https://api.perplexity.ai/chat/completions";

/// [`SearchOracle`] backed by Perplexity. Requires `PERPLEXITY_API_KEY`.
pub struct PerplexityClient {
    chat: ChatClient,
    model: String,
}

impl PerplexityClient {
    pub fn new(config: &SearchConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("PERPLEXITY_API_KEY")
            .map_err(|_| FunnelError::config("PERPLEXITY_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| PERPLEXITY_CHAT_URL.to_string());
        Ok(Self {
            chat: ChatClient::new(
                "search",
                api_key,
                url,
                Duration::from_secs(config.timeout_secs),
                retry,
            )?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl SearchOracle for PerplexityClient {
    async fn query(&self, text: &str) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .message(ChatMessage::system(
                "Find recent, verifiable news stories. For every story give a title, \
                 a one-paragraph summary, and the source URL.",
            ))
            .message(ChatMessage::user(text));
        let content = self.chat.complete(&request).await?;
        if content.trim().is_empty() {
            return Err(FunnelError::malformed("search", "empty search result"));
        }
        Ok(content)
    }
}
