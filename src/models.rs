//! Core data models that flow through the funnel.
//!
//! A [`Candidate`] is the in-flight record: built at the ingestion boundary,
//! enriched by each stage, then either persisted as a [`Lead`] or dropped.
//! [`Lead`]s and [`DiscoveryTopic`]s are the durable records owned by the
//! store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// An unvetted story, pre-persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub summary: String,
    /// Free-text provenance tag, e.g. `"RSS: https://…/feed"`.
    pub source_origin: String,
    pub published_at: Option<DateTime<Utc>>,

    /// Set by semantic dedup.
    pub embedding: Option<Vec<f32>>,
    pub virality_score: i64,
    pub viral_hook: String,
    pub brand_score: i64,
    pub brand_reasoning: String,
    /// Sub-topics pulled out by the brand gate; seeds for discovery.
    pub new_topics: Vec<String>,
}

impl Candidate {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        summary: impl Into<String>,
        source_origin: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            summary: summary.into(),
            source_origin: source_origin.into(),
            published_at: None,
            embedding: None,
            virality_score: 0,
            viral_hook: String::new(),
            brand_score: 0,
            brand_reasoning: String::new(),
            new_topics: Vec::new(),
        }
    }

    pub fn with_published_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.published_at = at;
        self
    }

    /// Text handed to the embedding model: title and summary on one line.
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.summary)
            .replace(['\r', '\n'], " ")
    }
}

/// Editorial lifecycle of a persisted lead.
///
/// The string forms are a contract with downstream curation and research
/// stages and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadStatus {
    New,
    Approved,
    Rejected,
    Published,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Approved => "approved",
            LeadStatus::Rejected => "rejected",
            LeadStatus::Published => "published",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "approved" => Ok(LeadStatus::Approved),
            "rejected" => Ok(LeadStatus::Rejected),
            "published" => Ok(LeadStatus::Published),
            other => Err(format!(
                "unknown lead status '{}': expected new, approved, rejected, or published",
                other
            )),
        }
    }
}

/// A candidate that passed every gate and was durably stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub brand_score: i64,
    pub virality_score: i64,
    pub viral_hook: String,
    pub source_origin: String,
    pub status: LeadStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Build the durable record for an accepted candidate.
    pub fn from_candidate(id: String, candidate: &Candidate, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            summary: candidate.summary.clone(),
            embedding: candidate.embedding.clone().unwrap_or_default(),
            brand_score: candidate.brand_score,
            virality_score: candidate.virality_score,
            viral_hook: candidate.viral_hook.clone(),
            source_origin: candidate.source_origin.clone(),
            status: LeadStatus::New,
            published_at: candidate.published_at,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    Active,
    Exhausted,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Active => "active",
            TopicStatus::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TopicStatus::Active),
            "exhausted" => Ok(TopicStatus::Exhausted),
            other => Err(format!("unknown topic status '{}'", other)),
        }
    }
}

/// A search seed driving future ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryTopic {
    pub id: String,
    pub topic: String,
    /// Weak back-reference to the lead this topic was extracted from.
    pub origin_lead_id: Option<String>,
    pub status: TopicStatus,
    pub last_searched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`DiscoveryTopic`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub topic: String,
    pub origin_lead_id: Option<String>,
}

impl NewTopic {
    /// A topic that came from the discovery engine rather than a lead.
    pub fn fresh(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            origin_lead_id: None,
        }
    }

    pub fn from_lead(topic: impl Into<String>, lead_id: &str) -> Self {
        Self {
            topic: topic.into(),
            origin_lead_id: Some(lead_id.to_string()),
        }
    }
}
