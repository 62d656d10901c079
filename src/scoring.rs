//! Virality and brand gates.
//!
//! Both gates are one scoring call each and run in order: brand scoring
//! only happens for stories already judged shareable. A failed or
//! malformed scoring call counts as a score of 0.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::Candidate;
use crate::oracle::{ScoreDimension, ScoreOracle, ScoreReport};

/// Which gate stopped a candidate, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    Passed,
    FailedVirality,
    FailedBrand,
}

pub struct ScoringPipeline {
    oracle: Arc<dyn ScoreOracle>,
    virality_threshold: i64,
    brand_threshold: i64,
}

impl ScoringPipeline {
    pub fn new(oracle: Arc<dyn ScoreOracle>, virality_threshold: i64, brand_threshold: i64) -> Self {
        Self {
            oracle,
            virality_threshold,
            brand_threshold,
        }
    }

    async fn score(&self, dimension: ScoreDimension, candidate: &Candidate) -> ScoreReport {
        match self
            .oracle
            .score(dimension, &candidate.title, &candidate.summary)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    stage = dimension.as_str(),
                    url = %candidate.url,
                    title = %candidate.title,
                    error = %e,
                    "scoring failed, using 0"
                );
                ScoreReport::zero()
            }
        }
    }

    /// Score virality into `candidate`; true if it meets the threshold.
    pub async fn virality_gate(&self, candidate: &mut Candidate) -> bool {
        let report = self.score(ScoreDimension::Virality, candidate).await;
        candidate.virality_score = report.score.clamp(0, 100);
        candidate.viral_hook = report.rationale;
        let passed = candidate.virality_score >= self.virality_threshold;
        debug!(url = %candidate.url, score = candidate.virality_score, passed, "virality gate");
        passed
    }

    /// Score brand fit into `candidate`; true if it meets the threshold.
    ///
    /// Extracted sub-topics are kept only for candidates that pass.
    pub async fn brand_gate(&self, candidate: &mut Candidate) -> bool {
        let report = self.score(ScoreDimension::Brand, candidate).await;
        candidate.brand_score = report.score.clamp(0, 100);
        candidate.brand_reasoning = report.rationale;
        let passed = candidate.brand_score >= self.brand_threshold;
        if passed {
            candidate.new_topics = report.new_topics;
        }
        debug!(url = %candidate.url, score = candidate.brand_score, passed, "brand gate");
        passed
    }

    /// Both gates, virality first.
    pub async fn evaluate(&self, candidate: &mut Candidate) -> GateResult {
        if !self.virality_gate(candidate).await {
            return GateResult::FailedVirality;
        }
        if !self.brand_gate(candidate).await {
            return GateResult::FailedBrand;
        }
        GateResult::Passed
    }
}
