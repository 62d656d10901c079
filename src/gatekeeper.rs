//! Cheap batched relevance pre-filter.
//!
//! One oracle call judges a whole batch of titles. The oracle is
//! untrusted: out-of-range, negative, and repeated indices are dropped,
//! and survivors keep their input order.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::models::Candidate;
use crate::oracle::BatchRelevanceOracle;

/// Survivors and rejects of one gatekeeper pass.
#[derive(Debug, Default)]
pub struct GateOutcome {
    pub passed: Vec<Candidate>,
    /// Explicitly rejected by the oracle. Terminal for these URLs.
    pub rejected: Vec<Candidate>,
    /// In batches whose oracle call failed. Not terminal.
    pub dropped: Vec<Candidate>,
    pub failed_batches: usize,
}

pub struct Gatekeeper {
    oracle: Arc<dyn BatchRelevanceOracle>,
    batch_size: usize,
}

impl Gatekeeper {
    pub fn new(oracle: Arc<dyn BatchRelevanceOracle>, batch_size: usize) -> Self {
        Self {
            oracle,
            batch_size: batch_size.max(1),
        }
    }

    /// Judge one batch; returns the positions that passed, ascending.
    pub async fn filter_batch(&self, batch: &[Candidate]) -> Result<Vec<usize>> {
        let titles: Vec<String> = batch.iter().map(|c| c.title.clone()).collect();
        let raw = self.oracle.filter(&titles).await?;
        Ok(sanitize_indices(&raw, batch.len()))
    }

    /// Run every candidate through the gate in fixed-size batches.
    ///
    /// A failed oracle call drops its whole batch; the other batches
    /// still run.
    pub async fn filter_all(&self, candidates: Vec<Candidate>) -> GateOutcome {
        let mut outcome = GateOutcome::default();
        let mut remaining = candidates.into_iter().peekable();
        let mut batch_no = 0;

        while remaining.peek().is_some() {
            batch_no += 1;
            let batch: Vec<Candidate> = remaining.by_ref().take(self.batch_size).collect();

            match self.filter_batch(&batch).await {
                Ok(keep) => {
                    let keep: BTreeSet<usize> = keep.into_iter().collect();
                    info!(
                        stage = "gatekeeper",
                        batch = batch_no,
                        input = batch.len(),
                        output = keep.len(),
                        "batch judged"
                    );
                    for (i, c) in batch.into_iter().enumerate() {
                        if keep.contains(&i) {
                            outcome.passed.push(c);
                        } else {
                            outcome.rejected.push(c);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        stage = "gatekeeper",
                        batch = batch_no,
                        size = batch.len(),
                        error = %e,
                        "batch dropped"
                    );
                    outcome.failed_batches += 1;
                    outcome.dropped.extend(batch);
                }
            }
        }

        outcome
    }
}

/// Keep indices within `[0, len)`, deduplicated and sorted.
pub fn sanitize_indices(raw: &[i64], len: usize) -> Vec<usize> {
    let set: BTreeSet<usize> = raw
        .iter()
        .filter_map(|&i| usize::try_from(i).ok())
        .filter(|&i| i < len)
        .collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FunnelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Passes titles containing "keep"; fails any batch containing "boom".
    struct KeywordOracle {
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchRelevanceOracle for KeywordOracle {
        async fn filter(&self, titles: &[String]) -> Result<Vec<i64>> {
            self.batch_sizes.lock().unwrap().push(titles.len());
            if titles.iter().any(|t| t.contains("boom")) {
                return Err(FunnelError::transient("gatekeeper", "down"));
            }
            let mut out: Vec<i64> = titles
                .iter()
                .enumerate()
                .filter(|(_, t)| t.contains("keep"))
                .map(|(i, _)| i as i64)
                .collect();
            out.extend([-1, 99]);
            Ok(out)
        }
    }

    fn cand(title: &str, n: usize) -> Candidate {
        Candidate::new(title, format!("https://a.test/{}", n), "", "test")
    }

    #[test]
    fn sanitize_drops_out_of_range_and_repeats() {
        assert_eq!(sanitize_indices(&[3, -1, 0, 3, 7, 2], 4), vec![0, 2, 3]);
        assert!(sanitize_indices(&[0], 0).is_empty());
    }

    #[tokio::test]
    async fn batches_are_bounded_and_order_preserved() {
        let oracle = Arc::new(KeywordOracle {
            batch_sizes: Mutex::new(Vec::new()),
        });
        let gate = Gatekeeper::new(oracle.clone(), 2);
        let input = vec![
            cand("keep a", 0),
            cand("drop b", 1),
            cand("keep c", 2),
            cand("keep d", 3),
            cand("drop e", 4),
        ];

        let out = gate.filter_all(input).await;
        let titles: Vec<&str> = out.passed.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["keep a", "keep c", "keep d"]);
        assert_eq!(out.rejected.len(), 2);
        assert_eq!(*oracle.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_without_stopping_others() {
        let oracle = Arc::new(KeywordOracle {
            batch_sizes: Mutex::new(Vec::new()),
        });
        let gate = Gatekeeper::new(oracle, 2);
        let input = vec![
            cand("keep a", 0),
            cand("boom", 1),
            cand("keep c", 2),
        ];

        let out = gate.filter_all(input).await;
        assert_eq!(out.failed_batches, 1);
        assert_eq!(out.dropped.len(), 2);
        assert_eq!(out.passed.len(), 1);
        assert_eq!(out.passed[0].title, "keep c");
        assert!(out.rejected.is_empty());
    }
}
