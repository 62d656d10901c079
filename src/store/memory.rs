//! In-memory [`LeadStore`] implementation for tests.
//!
//! Uses `HashSet` and `Vec` behind `std::sync::RwLock`. Similarity search
//! is a brute-force scan over all stored lead embeddings.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_distance;
use crate::error::{FunnelError, Result};
use crate::models::{Candidate, DiscoveryTopic, Lead, LeadStatus, NewTopic, TopicStatus};

use super::{LeadStore, StoreStats, TOP_BRAND_LIMIT};

/// In-memory store for tests.
pub struct InMemoryStore {
    leads: RwLock<Vec<Lead>>,
    processed: RwLock<HashSet<String>>,
    topics: RwLock<Vec<DiscoveryTopic>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            leads: RwLock::new(Vec::new()),
            processed: RwLock::new(HashSet::new()),
            topics: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every stored lead, in insertion order.
    pub fn leads(&self) -> Vec<Lead> {
        self.leads
            .read()
            .map(|leads| leads.clone())
            .unwrap_or_default()
    }

    pub fn processed_urls(&self) -> HashSet<String> {
        self.processed
            .read()
            .map(|set| set.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> FunnelError {
    FunnelError::Store("in-memory store lock poisoned".to_string())
}

fn count_by<'a>(statuses: impl Iterator<Item = &'a str>) -> Vec<(String, i64)> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

#[async_trait]
impl LeadStore for InMemoryStore {
    async fn is_url_processed(&self, url: &str) -> Result<bool> {
        if self.processed.read().map_err(poisoned)?.contains(url) {
            return Ok(true);
        }
        let leads = self.leads.read().map_err(poisoned)?;
        Ok(leads.iter().any(|l| l.url == url))
    }

    async fn mark_processed(&self, url: &str) -> Result<()> {
        self.processed
            .write()
            .map_err(poisoned)?
            .insert(url.to_string());
        Ok(())
    }

    async fn has_similar_lead(&self, embedding: &[f32], max_distance: f32) -> Result<bool> {
        let leads = self.leads.read().map_err(poisoned)?;
        Ok(leads
            .iter()
            .filter(|l| !l.embedding.is_empty())
            .any(|l| cosine_distance(embedding, &l.embedding) < max_distance))
    }

    async fn insert_lead(&self, candidate: &Candidate) -> Result<String> {
        let mut leads = self.leads.write().map_err(poisoned)?;
        if leads.iter().any(|l| l.url == candidate.url) {
            return Err(FunnelError::DuplicateConflict {
                entity: "lead",
                key: candidate.url.clone(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        leads.push(Lead::from_candidate(id.clone(), candidate, Utc::now()));
        Ok(id)
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        let leads = self.leads.read().map_err(poisoned)?;
        Ok(leads.iter().find(|l| l.id == id).cloned())
    }

    async fn fetch_candidates_approved(&self, since: DateTime<Utc>) -> Result<Vec<Lead>> {
        let leads = self.leads.read().map_err(poisoned)?;
        let mut out: Vec<Lead> = leads
            .iter()
            .rev()
            .filter(|l| l.created_at >= since)
            .filter(|l| matches!(l.status, LeadStatus::New | LeadStatus::Approved))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_lead_status(&self, id: &str, status: LeadStatus) -> Result<bool> {
        let mut leads = self.leads.write().map_err(poisoned)?;
        match leads.iter_mut().find(|l| l.id == id) {
            Some(lead) => {
                lead.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_topics(&self, new_topics: &[NewTopic]) -> Result<usize> {
        let mut topics = self.topics.write().map_err(poisoned)?;
        let mut inserted = 0;
        for nt in new_topics {
            if topics.iter().any(|t| t.topic == nt.topic) {
                continue;
            }
            topics.push(DiscoveryTopic {
                id: uuid::Uuid::new_v4().to_string(),
                topic: nt.topic.clone(),
                origin_lead_id: nt.origin_lead_id.clone(),
                status: TopicStatus::Active,
                last_searched_at: None,
                created_at: Utc::now(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn next_topic(&self) -> Result<Option<DiscoveryTopic>> {
        let topics = self.topics.read().map_err(poisoned)?;
        Ok(topics
            .iter()
            .filter(|t| t.status == TopicStatus::Active)
            .min_by_key(|t| (t.last_searched_at.is_some(), t.last_searched_at, t.created_at))
            .cloned())
    }

    async fn touch_topic(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut topics = self.topics.write().map_err(poisoned)?;
        if let Some(topic) = topics.iter_mut().find(|t| t.id == id) {
            topic.last_searched_at = Some(at);
        }
        Ok(())
    }

    async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<bool> {
        let mut topics = self.topics.write().map_err(poisoned)?;
        match topics.iter_mut().find(|t| t.id == id) {
            Some(topic) => {
                topic.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_topics(&self) -> Result<Vec<DiscoveryTopic>> {
        Ok(self.topics.read().map_err(poisoned)?.clone())
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats> {
        let leads = self.leads.read().map_err(poisoned)?;
        let topics = self.topics.read().map_err(poisoned)?;

        let mut top_brand: Vec<Lead> = leads.iter().rev().cloned().collect();
        top_brand.sort_by(|a, b| b.brand_score.cmp(&a.brand_score));
        top_brand.truncate(TOP_BRAND_LIMIT);

        Ok(StoreStats {
            total_leads: leads.len() as i64,
            leads_by_status: count_by(leads.iter().map(|l| l.status.as_str())),
            leads_since_cutoff: leads.iter().filter(|l| l.created_at >= cutoff).count() as i64,
            top_brand,
            topics_by_status: count_by(topics.iter().map(|t| t.status.as_str())),
            processed_urls: self.processed.read().map_err(poisoned)?.len() as i64,
        })
    }
}
