//! Novelty decisions: exact URL first, then semantic similarity.
//!
//! The checks run cheapest first and stop at the first rejection, so a
//! known URL never costs an embedding call. Every failure is fail-closed:
//! a candidate that cannot be checked is treated as not novel.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::EmbeddingOracle;
use crate::error::Result;
use crate::models::Candidate;
use crate::store::LeadStore;

/// Outcome of a novelty check.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    /// Novel; carries the embedding computed for it.
    Novel(Vec<f32>),
    /// URL already processed or already a lead.
    KnownUrl,
    /// An existing lead lies within the similarity cutoff.
    SimilarLead,
    /// The embedding oracle failed.
    EmbeddingFailed,
    /// A store lookup failed.
    StoreFailed,
}

impl DedupVerdict {
    pub fn is_novel(&self) -> bool {
        matches!(self, DedupVerdict::Novel(_))
    }

    /// Whether this outcome is terminal for the URL.
    ///
    /// Check failures are not: the candidate gets another chance on the
    /// next run.
    pub fn marks_processed(&self) -> bool {
        matches!(self, DedupVerdict::KnownUrl | DedupVerdict::SimilarLead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DedupVerdict::Novel(_) => "novel",
            DedupVerdict::KnownUrl => "known_url",
            DedupVerdict::SimilarLead => "similar_lead",
            DedupVerdict::EmbeddingFailed => "embedding_failed",
            DedupVerdict::StoreFailed => "store_failed",
        }
    }
}

pub struct Deduplicator {
    store: Arc<dyn LeadStore>,
    embedder: Arc<dyn EmbeddingOracle>,
    similarity_threshold: f32,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn LeadStore>,
        embedder: Arc<dyn EmbeddingOracle>,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            similarity_threshold,
        }
    }

    /// Cosine distance under which two stories count as the same.
    pub fn max_distance(&self) -> f32 {
        1.0 - self.similarity_threshold
    }

    /// Full check: URL, then embedding, then similarity.
    pub async fn is_novel(&self, candidate: &Candidate) -> DedupVerdict {
        if let Some(rejected) = self.check_url(candidate).await {
            return rejected;
        }
        self.check_semantic(candidate).await
    }

    /// Exact-URL stage. `None` means the URL is new.
    pub async fn check_url(&self, candidate: &Candidate) -> Option<DedupVerdict> {
        match self.store.is_url_processed(&candidate.url).await {
            Ok(false) => None,
            Ok(true) => {
                debug!(url = %candidate.url, "url already processed");
                Some(DedupVerdict::KnownUrl)
            }
            Err(e) => {
                warn!(stage = "url_dedup", url = %candidate.url, error = %e, "url lookup failed");
                Some(DedupVerdict::StoreFailed)
            }
        }
    }

    /// Embedding and similarity stages. Assumes the URL check passed.
    pub async fn check_semantic(&self, candidate: &Candidate) -> DedupVerdict {
        let embedding = match self.embedder.embed(&candidate.embedding_text()).await {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    stage = "semantic_dedup",
                    url = %candidate.url,
                    title = %candidate.title,
                    error = %e,
                    "embedding failed, dropping candidate"
                );
                return DedupVerdict::EmbeddingFailed;
            }
        };

        match self.similar_exists(&embedding).await {
            Ok(false) => DedupVerdict::Novel(embedding),
            Ok(true) => {
                debug!(url = %candidate.url, title = %candidate.title, "similar lead exists");
                DedupVerdict::SimilarLead
            }
            Err(e) => {
                warn!(
                    stage = "semantic_dedup",
                    url = %candidate.url,
                    error = %e,
                    "similarity lookup failed"
                );
                DedupVerdict::StoreFailed
            }
        }
    }

    /// Whether any stored lead is within the similarity cutoff of `embedding`.
    pub async fn similar_exists(&self, embedding: &[f32]) -> Result<bool> {
        self.store
            .has_similar_lead(embedding, self.max_distance())
            .await
    }
}
