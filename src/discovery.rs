//! Topic generation that keeps the ingestion loop fed.
//!
//! [`DiscoveryEngine::refuel`] never fails and never returns an empty list
//! for a positive count: when the oracle is down or returns nothing usable,
//! a fixed fallback list is used instead.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{info, warn};

use crate::config::DiscoveryStrategy;
use crate::models::NewTopic;
use crate::oracle::{TopicOracle, TopicPrompt};

const FALLBACK_INTERSECTIONS: &[&str] = &["History + Unexplained", "Space + Mystery"];

pub struct DiscoveryEngine {
    oracle: Arc<dyn TopicOracle>,
    strategy: DiscoveryStrategy,
}

impl DiscoveryEngine {
    pub fn new(oracle: Arc<dyn TopicOracle>, strategy: DiscoveryStrategy) -> Self {
        Self { oracle, strategy }
    }

    /// Generate up to `count` new topics for the current year.
    pub async fn refuel(&self, count: usize) -> Vec<String> {
        self.refuel_for_year(count, Utc::now().year()).await
    }

    pub async fn refuel_for_year(&self, count: usize, year: i32) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let generated = match self.strategy {
            DiscoveryStrategy::Direct => self.direct(count, year).await,
            DiscoveryStrategy::Evolutionary => self.evolutionary(count, year).await,
        };

        match generated {
            Some(topics) if !topics.is_empty() => {
                info!(stage = "refuel", count = topics.len(), "generated topics");
                topics
            }
            _ => {
                warn!(stage = "refuel", "topic generation failed, using fallback topics");
                fallback_topics(year, count)
            }
        }
    }

    async fn direct(&self, count: usize, year: i32) -> Option<Vec<String>> {
        match self
            .oracle
            .topics(TopicPrompt::BroadQueries { count, year })
            .await
        {
            Ok(raw) => Some(clean_topics(raw, count)),
            Err(e) => {
                warn!(stage = "refuel", error = %e, "broad query generation failed");
                None
            }
        }
    }

    async fn evolutionary(&self, count: usize, year: i32) -> Option<Vec<String>> {
        let intersections = match self
            .oracle
            .topics(TopicPrompt::Intersections { count })
            .await
        {
            Ok(raw) => clean_topics(raw, count),
            Err(e) => {
                warn!(stage = "refuel", error = %e, "intersection generation failed");
                Vec::new()
            }
        };
        let intersections = if intersections.is_empty() {
            FALLBACK_INTERSECTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            intersections
        };

        match self
            .oracle
            .topics(TopicPrompt::ConcreteQueries {
                intersections: &intersections,
                year,
            })
            .await
        {
            Ok(raw) => Some(clean_topics(raw, count)),
            Err(e) => {
                warn!(stage = "refuel", error = %e, "query generation failed");
                None
            }
        }
    }
}

/// Trim, drop blanks and case-insensitive repeats, cap at `count`.
pub fn clean_topics(raw: Vec<String>, count: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .take(count)
        .collect()
}

/// Deterministic topics used when generation fails. Non-empty for any
/// positive `count`.
pub fn fallback_topics(year: i32, count: usize) -> Vec<String> {
    let all = [
        format!("recent scientific anomalies {}", year),
        "unexplained archaeological discoveries".to_string(),
        format!("strange natural phenomena {}", year),
        format!("deep sea discoveries {}", year),
        "newly declassified historical documents".to_string(),
    ];
    all.into_iter().take(count.max(1)).collect()
}

/// Topics extracted from an accepted lead, tagged with its id.
pub fn seeds_from_lead(lead_id: &str, topics: &[String]) -> Vec<NewTopic> {
    clean_topics(topics.to_vec(), usize::MAX)
        .into_iter()
        .map(|t| NewTopic::from_lead(t, lead_id))
        .collect()
}
