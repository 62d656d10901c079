//! TOML configuration parsing and validation.
//!
//! The whole process is driven by one [`Config`] built at startup by
//! [`load_config`] and passed by reference into every component. Nothing
//! reads configuration from a global.
//!
//! A handful of funnel tunables can also be overridden from the
//! environment (see [`apply_env_overrides`]); credentials are only ever
//! read from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// How the discovery engine invents new topics.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    /// One call for broad, list-generating search queries.
    #[default]
    Direct,
    /// Invent cross-domain intersections, then turn each into a query.
    Evolutionary,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FunnelConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_virality_threshold")]
    pub virality_threshold: i64,
    #[serde(default = "default_brand_threshold")]
    pub brand_threshold: i64,
    #[serde(default = "default_filter_batch_size")]
    pub filter_batch_size: usize,
    #[serde(default)]
    pub max_candidates: Option<usize>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_refuel_count")]
    pub refuel_count: usize,
    #[serde(default)]
    pub discovery_strategy: DiscoveryStrategy,
    #[serde(default = "default_topic_searches")]
    pub topic_searches_per_run: usize,
    #[serde(default = "default_true")]
    pub recheck_before_persist: bool,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            virality_threshold: default_virality_threshold(),
            brand_threshold: default_brand_threshold(),
            filter_batch_size: default_filter_batch_size(),
            max_candidates: None,
            workers: default_workers(),
            refuel_count: default_refuel_count(),
            discovery_strategy: DiscoveryStrategy::default(),
            topic_searches_per_run: default_topic_searches(),
            recheck_before_persist: true,
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_virality_threshold() -> i64 {
    78
}
fn default_brand_threshold() -> i64 {
    70
}
fn default_filter_batch_size() -> usize {
    20
}
fn default_workers() -> usize {
    5
}
fn default_refuel_count() -> usize {
    3
}
fn default_topic_searches() -> usize {
    1
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_min")]
    pub backoff_min_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_min_secs: default_backoff_min(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    1
}
fn default_backoff_min() -> u64 {
    4
}
fn default_backoff_max() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            url: None,
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    /// Cheap model: gatekeeper, search queries, extraction, discovery.
    #[serde(default = "default_model_mini")]
    pub model_mini: String,
    /// Scoring model: virality and brand gates.
    #[serde(default = "default_model_main")]
    pub model_main: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model_mini: default_model_mini(),
            model_main: default_model_main(),
            timeout_secs: default_llm_timeout(),
            url: None,
        }
    }
}

fn default_model_mini() -> String {
    "gpt-4o-mini".to_string()
}
fn default_model_main() -> String {
    "gpt-4o".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_search_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_search_model(),
            timeout_secs: default_llm_timeout(),
            url: None,
        }
    }
}

fn default_search_model() -> String {
    "sonar-pro".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default)]
    pub rss_feeds: Vec<String>,
    #[serde(default = "default_feed_timeout")]
    pub feed_timeout_secs: u64,
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
    #[serde(default)]
    pub max_item_age_days: Option<i64>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            rss_feeds: Vec::new(),
            feed_timeout_secs: default_feed_timeout(),
            max_items_per_feed: default_max_items_per_feed(),
            max_item_age_days: None,
        }
    }
}

fn default_feed_timeout() -> u64 {
    15
}
fn default_max_items_per_feed() -> usize {
    50
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// A config with only a database path and every provider disabled.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            funnel: FunnelConfig::default(),
            retry: RetryConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

/// Load, override from the process environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Apply `SIMILARITY_THRESHOLD`, `VIRALITY_THRESHOLD`, `BRAND_THRESHOLD`,
/// `FILTER_BATCH_SIZE` and `MAX_CANDIDATES` on top of the file values.
///
/// `lookup` is injected so tests don't touch the real environment.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("SIMILARITY_THRESHOLD") {
        config.funnel.similarity_threshold = v
            .trim()
            .parse()
            .with_context(|| format!("SIMILARITY_THRESHOLD is not a number: '{}'", v))?;
    }
    if let Some(v) = lookup("VIRALITY_THRESHOLD") {
        config.funnel.virality_threshold = v
            .trim()
            .parse()
            .with_context(|| format!("VIRALITY_THRESHOLD is not an integer: '{}'", v))?;
    }
    if let Some(v) = lookup("BRAND_THRESHOLD") {
        config.funnel.brand_threshold = v
            .trim()
            .parse()
            .with_context(|| format!("BRAND_THRESHOLD is not an integer: '{}'", v))?;
    }
    if let Some(v) = lookup("FILTER_BATCH_SIZE") {
        config.funnel.filter_batch_size = v
            .trim()
            .parse()
            .with_context(|| format!("FILTER_BATCH_SIZE is not an integer: '{}'", v))?;
    }
    if let Some(v) = lookup("MAX_CANDIDATES") {
        let v = v.trim();
        config.funnel.max_candidates = if v.is_empty() || v.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(
                v.parse()
                    .with_context(|| format!("MAX_CANDIDATES is not an integer: '{}'", v))?,
            )
        };
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    let f = &config.funnel;

    if !(0.0..=1.0).contains(&f.similarity_threshold) {
        bail!("funnel.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0..=100).contains(&f.virality_threshold) {
        bail!("funnel.virality_threshold must be in [0, 100]");
    }
    if !(0..=100).contains(&f.brand_threshold) {
        bail!("funnel.brand_threshold must be in [0, 100]");
    }
    if f.filter_batch_size == 0 {
        bail!("funnel.filter_batch_size must be > 0");
    }
    if f.workers == 0 {
        bail!("funnel.workers must be > 0");
    }
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.backoff_min_secs > config.retry.backoff_max_secs {
        bail!("retry.backoff_min_secs must be <= retry.backoff_max_secs");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!("Unknown llm provider: '{}'. Must be disabled or openai.", other),
    }
    match config.search.provider.as_str() {
        "disabled" | "perplexity" => {}
        other => bail!(
            "Unknown search provider: '{}'. Must be disabled or perplexity.",
            other
        ),
    }

    for timeout in [
        config.embedding.timeout_secs,
        config.llm.timeout_secs,
        config.search.timeout_secs,
        config.sources.feed_timeout_secs,
    ] {
        if timeout == 0 {
            bail!("timeouts must be > 0 seconds");
        }
    }

    Ok(())
}
