//! Ingestion adapters: RSS feeds and topic-driven web search.
//!
//! Both produce already-normalized [`Candidate`]s; everything after
//! ingestion works with the typed record only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::config::SourcesConfig;
use crate::error::{FunnelError, Result};
use crate::models::Candidate;
use crate::oracle::{SearchOracle, StoryExtractor};
use crate::retry::RetryPolicy;
use crate::text::candidate_from_raw;

const FEED_CONCURRENCY: usize = 5;

/// A bulk producer of candidates.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_all(&self) -> Result<Vec<Candidate>>;
}

/// Candidates for one discovery topic.
#[async_trait]
pub trait TopicSearch: Send + Sync {
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>>;
}

/// Fetches every configured RSS/Atom feed.
///
/// A feed that fails to download or parse is logged and skipped.
pub struct RssSource {
    client: reqwest::Client,
    feeds: Vec<String>,
    max_items: usize,
    max_age_days: Option<i64>,
    retry: RetryPolicy,
}

impl RssSource {
    pub fn new(config: &SourcesConfig, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.feed_timeout_secs))
            .user_agent(concat!("lead-funnel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FunnelError::config(format!("failed to build feed client: {}", e)))?;
        Ok(Self {
            client,
            feeds: config.rss_feeds.clone(),
            max_items: config.max_items_per_feed,
            max_age_days: config.max_item_age_days,
            retry,
        })
    }

    async fn download(&self, feed_url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| FunnelError::from_http("feed", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FunnelError::from_status("feed", status, String::new()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FunnelError::from_http("feed", e))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_feed(&self, feed_url: &str) -> Result<Vec<Candidate>> {
        let bytes = self
            .retry
            .run("feed", move || self.download(feed_url))
            .await?;
        let cutoff = self
            .max_age_days
            .map(|days| Utc::now() - chrono::Duration::days(days));
        parse_feed(&bytes, feed_url, self.max_items, cutoff)
    }

    async fn fetch_tagged(&self, feed_url: &str) -> (String, Result<Vec<Candidate>>) {
        (feed_url.to_string(), self.fetch_feed(feed_url).await)
    }
}

#[async_trait]
impl FeedSource for RssSource {
    fn name(&self) -> &str {
        "rss"
    }

    async fn fetch_all(&self) -> Result<Vec<Candidate>> {
        let fetches: Vec<BoxFuture<'_, (String, Result<Vec<Candidate>>)>> = self
            .feeds
            .iter()
            .map(|url| self.fetch_tagged(url).boxed())
            .collect();
        let results: Vec<(String, Result<Vec<Candidate>>)> = stream::iter(fetches)
            .buffered(FEED_CONCURRENCY)
            .collect()
            .await;

        let mut all = Vec::new();
        for (url, result) in results {
            match result {
                Ok(items) => {
                    info!(feed = %url, items = items.len(), "feed parsed");
                    all.extend(items);
                }
                Err(e) => warn!(stage = "ingest", feed = %url, error = %e, "feed skipped"),
            }
        }
        Ok(all)
    }
}

/// Turn a feed document into candidates.
///
/// Entries without a title or link are skipped, as are entries published
/// before `cutoff`. At most `max_items` candidates are returned, in feed
/// order.
pub fn parse_feed(
    bytes: &[u8],
    feed_url: &str,
    max_items: usize,
    cutoff: Option<DateTime<Utc>>,
) -> Result<Vec<Candidate>> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FunnelError::malformed("feed", e))?;
    let origin = format!("RSS: {}", feed_url);

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let published = entry.published.or(entry.updated);
            if let (Some(cutoff), Some(published)) = (cutoff, published) {
                if published < cutoff {
                    return None;
                }
            }
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default();
            candidate_from_raw(&title, &link, &summary, origin.clone())
                .map(|c| c.with_published_at(published))
        })
        .take(max_items)
        .collect())
}

/// Searches the web for one discovery topic and extracts stories.
pub struct TopicSearchSource {
    extractor: Arc<dyn StoryExtractor>,
    search: Arc<dyn SearchOracle>,
}

impl TopicSearchSource {
    pub fn new(extractor: Arc<dyn StoryExtractor>, search: Arc<dyn SearchOracle>) -> Self {
        Self { extractor, search }
    }
}

#[async_trait]
impl TopicSearch for TopicSearchSource {
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>> {
        let year = Utc::now().year();
        let query = self.extractor.search_query(topic, year).await?;
        info!(stage = "ingest", topic, query = %query, "searching topic");

        let raw = self.search.query(&query).await?;
        let stories = self.extractor.extract_stories(&raw).await?;

        let origin = format!("Search: {}", topic);
        Ok(stories
            .into_iter()
            .filter_map(|s| candidate_from_raw(&s.title, &s.url, &s.summary, origin.clone()))
            .collect())
    }
}
