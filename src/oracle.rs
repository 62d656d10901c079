//! Capability seams for the remote judgement calls.
//!
//! Each trait is one kind of question the funnel asks a model. The
//! production implementations live in [`llm`](crate::llm) and
//! [`search`](crate::search); tests plug in deterministic fakes.
//!
//! Adapters own response-shape normalization: every method returns typed
//! values or a [`MalformedResponse`](crate::error::FunnelError::MalformedResponse)
//! error, so callers never inspect raw JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingOracle};
use crate::error::{FunnelError, Result};
use crate::llm::LlmClient;
use crate::retry::RetryPolicy;
use crate::search::PerplexityClient;

/// The two independent scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDimension {
    Virality,
    Brand,
}

impl ScoreDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreDimension::Virality => "virality",
            ScoreDimension::Brand => "brand",
        }
    }

    /// JSON field carrying the numeric score.
    pub fn score_field(&self) -> &'static str {
        match self {
            ScoreDimension::Virality => "virality_score",
            ScoreDimension::Brand => "brand_score",
        }
    }

    /// JSON field carrying the free-text rationale.
    pub fn rationale_field(&self) -> &'static str {
        match self {
            ScoreDimension::Virality => "hook_analysis",
            ScoreDimension::Brand => "reasoning",
        }
    }
}

/// Result of one scoring call. `score` is always within `0..=100`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreReport {
    pub score: i64,
    pub rationale: String,
    /// Sub-topics extracted alongside a brand score. Empty for virality.
    pub new_topics: Vec<String>,
}

impl ScoreReport {
    /// The fail-closed default used when scoring cannot produce a value.
    pub fn zero() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait ScoreOracle: Send + Sync {
    async fn score(
        &self,
        dimension: ScoreDimension,
        title: &str,
        summary: &str,
    ) -> Result<ScoreReport>;
}

/// Coarse relevance pass over a batch of titles.
#[async_trait]
pub trait BatchRelevanceOracle: Send + Sync {
    /// Indices into `titles` that pass. The result is untrusted: it may
    /// contain out-of-range, negative, or repeated values.
    async fn filter(&self, titles: &[String]) -> Result<Vec<i64>>;
}

/// What the discovery engine is asking for.
#[derive(Debug, Clone, Copy)]
pub enum TopicPrompt<'a> {
    /// `count` broad search queries that tend to surface lists of stories.
    BroadQueries { count: usize, year: i32 },
    /// `count` abstract cross-domain intersections, e.g. "Geology + Folklore".
    Intersections { count: usize },
    /// One concrete search query per intersection.
    ConcreteQueries { intersections: &'a [String], year: i32 },
}

#[async_trait]
pub trait TopicOracle: Send + Sync {
    async fn topics(&self, prompt: TopicPrompt<'_>) -> Result<Vec<String>>;
}

/// A story pulled out of raw search output, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedStory {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
}

/// Turns a discovery topic into searchable text and search output into stories.
#[async_trait]
pub trait StoryExtractor: Send + Sync {
    /// One focused search query for `topic`, anchored to `year`.
    async fn search_query(&self, topic: &str, year: i32) -> Result<String>;

    async fn extract_stories(&self, raw: &str) -> Result<Vec<ExtractedStory>>;
}

/// A web-grounded search model.
#[async_trait]
pub trait SearchOracle: Send + Sync {
    async fn query(&self, text: &str) -> Result<String>;
}

/// Stand-in for every oracle when its provider is `"disabled"`.
///
/// Each call fails with a configuration error naming the service, which
/// the calling stage handles like any other stage-local failure.
#[derive(Debug, Clone, Copy)]
pub struct DisabledOracle {
    pub service: &'static str,
}

impl DisabledOracle {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }

    fn err(&self) -> FunnelError {
        FunnelError::config(format!("{} provider is disabled", self.service))
    }
}

#[async_trait]
impl ScoreOracle for DisabledOracle {
    async fn score(&self, _: ScoreDimension, _: &str, _: &str) -> Result<ScoreReport> {
        Err(self.err())
    }
}

#[async_trait]
impl BatchRelevanceOracle for DisabledOracle {
    async fn filter(&self, _: &[String]) -> Result<Vec<i64>> {
        Err(self.err())
    }
}

#[async_trait]
impl TopicOracle for DisabledOracle {
    async fn topics(&self, _: TopicPrompt<'_>) -> Result<Vec<String>> {
        Err(self.err())
    }
}

#[async_trait]
impl StoryExtractor for DisabledOracle {
    async fn search_query(&self, _: &str, _: i32) -> Result<String> {
        Err(self.err())
    }

    async fn extract_stories(&self, _: &str) -> Result<Vec<ExtractedStory>> {
        Err(self.err())
    }
}

#[async_trait]
impl SearchOracle for DisabledOracle {
    async fn query(&self, _: &str) -> Result<String> {
        Err(self.err())
    }
}

/// Every remote capability the funnel needs, built once from config.
#[derive(Clone)]
pub struct Oracles {
    pub embedder: Arc<dyn EmbeddingOracle>,
    pub scorer: Arc<dyn ScoreOracle>,
    pub relevance: Arc<dyn BatchRelevanceOracle>,
    pub topics: Arc<dyn TopicOracle>,
    pub extractor: Arc<dyn StoryExtractor>,
    pub search: Arc<dyn SearchOracle>,
}

impl Oracles {
    /// Build the configured providers.
    ///
    /// Fails with a configuration error when an enabled provider has no
    /// credentials; disabled providers are replaced by [`DisabledOracle`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let embedder = create_embedder(&config.embedding, retry.clone())?;

        let search: Arc<dyn SearchOracle> = if config.search.is_enabled() {
            Arc::new(PerplexityClient::new(&config.search, retry.clone())?)
        } else {
            Arc::new(DisabledOracle::new("search"))
        };

        if config.llm.is_enabled() {
            let llm = Arc::new(LlmClient::new(&config.llm, retry)?);
            Ok(Self {
                embedder,
                scorer: llm.clone(),
                relevance: llm.clone(),
                topics: llm.clone(),
                extractor: llm,
                search,
            })
        } else {
            let off = Arc::new(DisabledOracle::new("llm"));
            Ok(Self {
                embedder,
                scorer: off.clone(),
                relevance: off.clone(),
                topics: off.clone(),
                extractor: off,
                search,
            })
        }
    }
}
