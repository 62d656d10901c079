//! Storage abstraction for the funnel.
//!
//! The [`LeadStore`] trait is the only way any component touches durable
//! state. It owns three record types: leads, processed URLs, and discovery
//! topics, plus the uniqueness and similarity queries over them.
//!
//! Two implementations ship with the crate:
//! - [`SqliteStore`](crate::sqlite_store::SqliteStore) for production runs
//! - [`InMemoryStore`](memory::InMemoryStore) for tests
//!
//! Every write is a single-row insert or update; no transaction spans
//! pipeline stages, so a crashed run is resumed by running again.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Candidate, DiscoveryTopic, Lead, LeadStatus, NewTopic, TopicStatus};

/// Aggregate counts reported by `funnel stats`.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_leads: i64,
    /// `(status, count)` pairs, ordered by status name.
    pub leads_by_status: Vec<(String, i64)>,
    pub leads_since_cutoff: i64,
    /// Highest brand scores first.
    pub top_brand: Vec<Lead>,
    pub topics_by_status: Vec<(String, i64)>,
    pub processed_urls: i64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`is_url_processed`](LeadStore::is_url_processed) | exact-URL dedup lookup |
/// | [`mark_processed`](LeadStore::mark_processed) | record a terminal outcome for a URL |
/// | [`has_similar_lead`](LeadStore::has_similar_lead) | nearest-neighbor existence check |
/// | [`insert_lead`](LeadStore::insert_lead) | persist an accepted candidate |
/// | [`fetch_candidates_approved`](LeadStore::fetch_candidates_approved) | curation read |
/// | [`update_lead_status`](LeadStore::update_lead_status) | curation write |
/// | [`insert_topics`](LeadStore::insert_topics) | idempotent topic insert |
/// | [`next_topic`](LeadStore::next_topic) | least-recently-searched active topic |
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// True if `url` is in the processed set or already belongs to a lead.
    async fn is_url_processed(&self, url: &str) -> Result<bool>;

    /// Add `url` to the processed set. Idempotent.
    async fn mark_processed(&self, url: &str) -> Result<()>;

    /// True if any stored lead embedding lies at cosine distance strictly
    /// below `max_distance`. Stops at the first hit.
    async fn has_similar_lead(&self, embedding: &[f32], max_distance: f32) -> Result<bool>;

    /// Persist an accepted candidate as a `new` lead and return its id.
    ///
    /// Fails with [`DuplicateConflict`](crate::error::FunnelError::DuplicateConflict)
    /// when a lead with the same URL already exists.
    async fn insert_lead(&self, candidate: &Candidate) -> Result<String>;

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>>;

    /// Leads created at or after `since` that are still `new` or `approved`,
    /// newest first.
    async fn fetch_candidates_approved(&self, since: DateTime<Utc>) -> Result<Vec<Lead>>;

    /// Returns `false` when no lead has this id.
    async fn update_lead_status(&self, id: &str, status: LeadStatus) -> Result<bool>;

    /// Insert topics, skipping any whose text already exists. Returns how
    /// many rows were actually created.
    async fn insert_topics(&self, topics: &[NewTopic]) -> Result<usize>;

    /// The active topic searched longest ago, never-searched topics first.
    async fn next_topic(&self) -> Result<Option<DiscoveryTopic>>;

    /// Stamp `last_searched_at` on a topic.
    async fn touch_topic(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<bool>;

    /// All topics, oldest first.
    async fn list_topics(&self) -> Result<Vec<DiscoveryTopic>>;

    /// Aggregate counts; `cutoff` bounds the "recent leads" figure.
    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats>;
}

/// Number of leads shown in the top-by-brand list.
pub const TOP_BRAND_LIMIT: usize = 5;
