//! The funnel orchestrator.
//!
//! One [`Funnel::run`] walks a batch through every stage in order:
//!
//! ```text
//! Ingest → Cap → UrlDedup → Gatekeeper → SemanticDedup → Virality → Brand → Persist → Refuel
//! ```
//!
//! The whole-batch stages (ingest, URL dedup, gatekeeper, refuel) run one
//! after another. Semantic dedup through persist is a per-candidate
//! pipeline run on a bounded worker pool. Persisting is serialized behind
//! a lock so a candidate can be re-checked against leads written by its
//! siblings in the same run.
//!
//! No stage failure aborts the run; every run ends with a [`RunSummary`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, FunnelConfig};
use crate::dedup::{DedupVerdict, Deduplicator};
use crate::discovery::{seeds_from_lead, DiscoveryEngine};
use crate::error::Result;
use crate::gatekeeper::Gatekeeper;
use crate::models::{Candidate, NewTopic};
use crate::oracle::Oracles;
use crate::retry::RetryPolicy;
use crate::scoring::ScoringPipeline;
use crate::sources::{FeedSource, RssSource, TopicSearch, TopicSearchSource};
use crate::store::LeadStore;

/// Which ingestion adapters a run pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSelection {
    #[default]
    All,
    Rss,
    Search,
}

impl SourceSelection {
    fn includes_rss(&self) -> bool {
        matches!(self, SourceSelection::All | SourceSelection::Rss)
    }

    fn includes_search(&self) -> bool {
        matches!(self, SourceSelection::All | SourceSelection::Search)
    }
}

impl FromStr for SourceSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(SourceSelection::All),
            "rss" => Ok(SourceSelection::Rss),
            "search" => Ok(SourceSelection::Search),
            other => Err(format!("unknown source '{}': expected all, rss, or search", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Cap,
    UrlDedup,
    Gatekeeper,
    SemanticDedup,
    Virality,
    Brand,
    Persist,
    Refuel,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Cap => "cap",
            Stage::UrlDedup => "url_dedup",
            Stage::Gatekeeper => "gatekeeper",
            Stage::SemanticDedup => "semantic_dedup",
            Stage::Virality => "virality",
            Stage::Brand => "brand",
            Stage::Persist => "persist",
            Stage::Refuel => "refuel",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts at one stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub input: usize,
    pub output: usize,
}

/// Public result of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One entry per stage that ran, in order.
    pub stages: Vec<StageReport>,
    pub lead_ids: Vec<String>,
    pub topics_searched: Vec<String>,
    /// Topics added by refuel.
    pub topics_injected: usize,
    /// Topics added from accepted leads.
    pub topics_seeded: usize,
    pub gatekeeper_failed_batches: usize,
    /// Candidates in failed gatekeeper batches, left unmarked.
    pub gatekeeper_deferred: usize,
}

impl RunSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    fn record(&mut self, stage: Stage, input: usize, output: usize) {
        info!(stage = stage.as_str(), input, output, "stage complete");
        self.stages.push(StageReport {
            stage,
            input,
            output,
        });
    }
}

/// Where a candidate's per-item pipeline ended.
#[derive(Debug)]
enum CandidateOutcome {
    Dropped(Stage),
    Persisted { lead_id: String, topics_seeded: usize },
}

const ITEM_STAGES: [Stage; 4] = [
    Stage::SemanticDedup,
    Stage::Virality,
    Stage::Brand,
    Stage::Persist,
];

pub struct Funnel {
    store: Arc<dyn LeadStore>,
    dedup: Deduplicator,
    gatekeeper: Gatekeeper,
    scoring: ScoringPipeline,
    discovery: DiscoveryEngine,
    feeds: Vec<Arc<dyn FeedSource>>,
    topic_search: Option<Arc<dyn TopicSearch>>,
    settings: FunnelConfig,
    persist_lock: Mutex<()>,
}

impl Funnel {
    /// A funnel with no ingestion adapters; attach them with
    /// [`with_feed`](Self::with_feed) and [`with_topic_search`](Self::with_topic_search).
    pub fn new(settings: &FunnelConfig, store: Arc<dyn LeadStore>, oracles: &Oracles) -> Self {
        Self {
            dedup: Deduplicator::new(
                store.clone(),
                oracles.embedder.clone(),
                settings.similarity_threshold,
            ),
            gatekeeper: Gatekeeper::new(oracles.relevance.clone(), settings.filter_batch_size),
            scoring: ScoringPipeline::new(
                oracles.scorer.clone(),
                settings.virality_threshold,
                settings.brand_threshold,
            ),
            discovery: DiscoveryEngine::new(oracles.topics.clone(), settings.discovery_strategy),
            store,
            feeds: Vec::new(),
            topic_search: None,
            settings: settings.clone(),
            persist_lock: Mutex::new(()),
        }
    }

    /// The production wiring: RSS feeds from `[sources]`, topic search
    /// through the configured search and LLM providers.
    pub fn from_config(config: &Config, store: Arc<dyn LeadStore>, oracles: &Oracles) -> Result<Self> {
        let mut funnel = Self::new(&config.funnel, store, oracles).with_topic_search(Arc::new(
            TopicSearchSource::new(oracles.extractor.clone(), oracles.search.clone()),
        ));
        if !config.sources.rss_feeds.is_empty() {
            let rss = RssSource::new(&config.sources, RetryPolicy::from_config(&config.retry))?;
            funnel = funnel.with_feed(Arc::new(rss));
        }
        Ok(funnel)
    }

    pub fn with_feed(mut self, feed: Arc<dyn FeedSource>) -> Self {
        self.feeds.push(feed);
        self
    }

    pub fn with_topic_search(mut self, search: Arc<dyn TopicSearch>) -> Self {
        self.topic_search = Some(search);
        self
    }

    /// Ingest from `selection`, then run the batch through the funnel.
    pub async fn run(&self, selection: SourceSelection) -> RunSummary {
        let mut summary = RunSummary::default();
        let raw = self.ingest(selection, &mut summary).await;
        self.process(raw, summary).await
    }

    /// Run an already-ingested batch through every stage after ingestion.
    pub async fn run_batch(&self, candidates: Vec<Candidate>) -> RunSummary {
        self.process(candidates, RunSummary::default()).await
    }

    async fn ingest(&self, selection: SourceSelection, summary: &mut RunSummary) -> Vec<Candidate> {
        let mut raw = Vec::new();

        if selection.includes_rss() {
            for feed in &self.feeds {
                match feed.fetch_all().await {
                    Ok(items) => raw.extend(items),
                    Err(e) => warn!(stage = "ingest", source = feed.name(), error = %e, "source skipped"),
                }
            }
        }

        if selection.includes_search() {
            if let Some(search) = &self.topic_search {
                self.search_topics(search.as_ref(), &mut raw, summary).await;
            }
        }

        raw
    }

    async fn search_topics(
        &self,
        search: &dyn TopicSearch,
        raw: &mut Vec<Candidate>,
        summary: &mut RunSummary,
    ) {
        let mut seen = HashSet::new();
        for _ in 0..self.settings.topic_searches_per_run {
            let topic = match self.store.next_topic().await {
                Ok(Some(topic)) => topic,
                Ok(None) => break,
                Err(e) => {
                    warn!(stage = "ingest", error = %e, "topic selection failed");
                    break;
                }
            };
            if !seen.insert(topic.id.clone()) {
                break;
            }

            match search.search(&topic.topic).await {
                Ok(items) => {
                    info!(stage = "ingest", topic = %topic.topic, items = items.len(), "topic searched");
                    raw.extend(items);
                }
                Err(e) => warn!(stage = "ingest", topic = %topic.topic, error = %e, "topic search failed"),
            }

            if let Err(e) = self.store.touch_topic(&topic.id, Utc::now()).await {
                warn!(stage = "ingest", topic = %topic.topic, error = %e, "failed to stamp topic");
            }
            summary.topics_searched.push(topic.topic);
        }
    }

    async fn process(&self, raw: Vec<Candidate>, mut summary: RunSummary) -> RunSummary {
        let raw_count = raw.len();
        let mut candidates = collapse_urls(raw);
        summary.record(Stage::Ingest, raw_count, candidates.len());

        if candidates.is_empty() {
            info!("nothing ingested, skipping to refuel");
            self.refuel(&mut summary).await;
            return summary;
        }

        if let Some(cap) = self.settings.max_candidates {
            let before = candidates.len();
            candidates.truncate(cap);
            summary.record(Stage::Cap, before, candidates.len());
        }

        let fresh = self.url_dedup(candidates, &mut summary).await;
        let gated = self.gate(fresh, &mut summary).await;
        self.per_candidate(gated, &mut summary).await;
        self.refuel(&mut summary).await;

        info!(leads = summary.lead_ids.len(), "run complete");
        summary
    }

    async fn url_dedup(&self, candidates: Vec<Candidate>, summary: &mut RunSummary) -> Vec<Candidate> {
        let input = candidates.len();
        let mut fresh = Vec::with_capacity(input);
        for c in candidates {
            match self.dedup.check_url(&c).await {
                None => fresh.push(c),
                Some(verdict) => {
                    debug!(stage = "url_dedup", url = %c.url, verdict = verdict.as_str(), "candidate dropped");
                    if verdict.marks_processed() {
                        self.mark_processed(Stage::UrlDedup, &c).await;
                    }
                }
            }
        }
        summary.record(Stage::UrlDedup, input, fresh.len());
        fresh
    }

    async fn gate(&self, candidates: Vec<Candidate>, summary: &mut RunSummary) -> Vec<Candidate> {
        let input = candidates.len();
        if input == 0 {
            summary.record(Stage::Gatekeeper, 0, 0);
            return candidates;
        }
        let outcome = self.gatekeeper.filter_all(candidates).await;
        for c in &outcome.rejected {
            self.mark_processed(Stage::Gatekeeper, c).await;
        }
        if !outcome.dropped.is_empty() {
            info!(
                stage = "gatekeeper",
                deferred = outcome.dropped.len(),
                failed_batches = outcome.failed_batches,
                "candidates left for the next run"
            );
        }
        summary.gatekeeper_failed_batches = outcome.failed_batches;
        summary.gatekeeper_deferred = outcome.dropped.len();
        summary.record(Stage::Gatekeeper, input, outcome.passed.len());
        outcome.passed
    }

    async fn per_candidate(&self, candidates: Vec<Candidate>, summary: &mut RunSummary) {
        let input = candidates.len();
        let outcomes: Vec<CandidateOutcome> = stream::iter(candidates)
            .map(|c| self.process_candidate(c))
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        let mut remaining = input;
        for stage in ITEM_STAGES {
            let dropped = outcomes
                .iter()
                .filter(|o| matches!(o, CandidateOutcome::Dropped(s) if *s == stage))
                .count();
            summary.record(stage, remaining, remaining - dropped);
            remaining -= dropped;
        }

        for outcome in outcomes {
            if let CandidateOutcome::Persisted {
                lead_id,
                topics_seeded,
            } = outcome
            {
                summary.lead_ids.push(lead_id);
                summary.topics_seeded += topics_seeded;
            }
        }
    }

    /// Semantic dedup → virality → brand → persist, for one candidate.
    async fn process_candidate(&self, mut candidate: Candidate) -> CandidateOutcome {
        let verdict = self.dedup.check_semantic(&candidate).await;
        if verdict.marks_processed() {
            self.mark_processed(Stage::SemanticDedup, &candidate).await;
        }
        match verdict {
            DedupVerdict::Novel(embedding) => candidate.embedding = Some(embedding),
            other => {
                debug!(stage = "semantic_dedup", url = %candidate.url, verdict = other.as_str(), "candidate dropped");
                return CandidateOutcome::Dropped(Stage::SemanticDedup);
            }
        }

        if !self.scoring.virality_gate(&mut candidate).await {
            self.mark_processed(Stage::Virality, &candidate).await;
            return CandidateOutcome::Dropped(Stage::Virality);
        }
        if !self.scoring.brand_gate(&mut candidate).await {
            self.mark_processed(Stage::Brand, &candidate).await;
            return CandidateOutcome::Dropped(Stage::Brand);
        }

        self.persist(candidate).await
    }

    async fn persist(&self, candidate: Candidate) -> CandidateOutcome {
        let _guard = self.persist_lock.lock().await;

        if self.settings.recheck_before_persist {
            if let Some(embedding) = candidate.embedding.as_deref() {
                match self.dedup.similar_exists(embedding).await {
                    Ok(false) => {}
                    Ok(true) => {
                        info!(url = %candidate.url, title = %candidate.title, "near-duplicate of a lead saved this run");
                        self.mark_processed(Stage::Persist, &candidate).await;
                        return CandidateOutcome::Dropped(Stage::Persist);
                    }
                    Err(e) => {
                        warn!(stage = "persist", url = %candidate.url, error = %e, "recheck failed");
                        return CandidateOutcome::Dropped(Stage::Persist);
                    }
                }
            }
        }

        let lead_id = match self.store.insert_lead(&candidate).await {
            Ok(id) => id,
            Err(e) if e.is_duplicate() => {
                info!(url = %candidate.url, "lead already exists");
                self.mark_processed(Stage::Persist, &candidate).await;
                return CandidateOutcome::Dropped(Stage::Persist);
            }
            Err(e) => {
                warn!(stage = "persist", url = %candidate.url, title = %candidate.title, error = %e, "failed to save lead");
                return CandidateOutcome::Dropped(Stage::Persist);
            }
        };
        self.mark_processed(Stage::Persist, &candidate).await;
        info!(
            lead_id = %lead_id,
            url = %candidate.url,
            virality = candidate.virality_score,
            brand = candidate.brand_score,
            "lead saved"
        );

        let seeds = seeds_from_lead(&lead_id, &candidate.new_topics);
        let topics_seeded = self.insert_topics(Stage::Persist, &seeds).await;

        CandidateOutcome::Persisted {
            lead_id,
            topics_seeded,
        }
    }

    async fn refuel(&self, summary: &mut RunSummary) {
        let generated = self.discovery.refuel(self.settings.refuel_count).await;
        let topics: Vec<NewTopic> = generated.iter().map(NewTopic::fresh).collect();
        let inserted = self.insert_topics(Stage::Refuel, &topics).await;
        summary.topics_injected = inserted;
        summary.record(Stage::Refuel, generated.len(), inserted);
    }

    async fn insert_topics(&self, stage: Stage, topics: &[NewTopic]) -> usize {
        if topics.is_empty() {
            return 0;
        }
        match self.store.insert_topics(topics).await {
            Ok(n) => n,
            Err(e) => {
                warn!(stage = stage.as_str(), count = topics.len(), error = %e, "failed to insert topics");
                0
            }
        }
    }

    async fn mark_processed(&self, stage: Stage, candidate: &Candidate) {
        if let Err(e) = self.store.mark_processed(&candidate.url).await {
            warn!(stage = stage.as_str(), url = %candidate.url, error = %e, "failed to mark url processed");
        }
    }
}

/// Keep the first candidate for each URL.
pub fn collapse_urls(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}
