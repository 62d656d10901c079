//! End-to-end tests for the funnel orchestrator.
//!
//! Every remote capability is replaced by a scripted fake so the tests
//! can drive dedup, gating, persistence, and refuel deterministically
//! against both the in-memory and the SQLite store.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

use lead_funnel::config::{Config, FunnelConfig};
use lead_funnel::embedding::EmbeddingOracle;
use lead_funnel::error::{FunnelError, Result};
use lead_funnel::models::{
    Candidate, DiscoveryTopic, Lead, LeadStatus, NewTopic, TopicStatus,
};
use lead_funnel::oracle::{
    BatchRelevanceOracle, DisabledOracle, Oracles, ScoreDimension, ScoreOracle, ScoreReport,
    TopicOracle, TopicPrompt,
};
use lead_funnel::retry::RetryPolicy;
use lead_funnel::sources::{FeedSource, TopicSearch};
use lead_funnel::sqlite_store::SqliteStore;
use lead_funnel::store::memory::InMemoryStore;
use lead_funnel::store::{LeadStore, StoreStats};
use lead_funnel::workflow::{Funnel, SourceSelection, Stage};

// ─── Fakes ──────────────────────────────────────────────────────────

/// Looks up a vector by the first table key found in the text.
struct TableEmbedder {
    table: Vec<(&'static str, Vec<f32>)>,
    fail: bool,
    calls: AtomicUsize,
}

impl TableEmbedder {
    fn new(table: Vec<(&'static str, Vec<f32>)>) -> Self {
        Self {
            table,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            table: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingOracle for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FunnelError::transient("embedding", "connection reset"));
        }
        self.table
            .iter()
            .find(|(key, _)| text.contains(key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| FunnelError::malformed("embedding", format!("no vector for {}", text)))
    }
}

/// Scores by title keyword; unknown titles get the defaults.
struct ScriptedScorer {
    virality: HashMap<&'static str, i64>,
    brand: HashMap<&'static str, i64>,
    fail: bool,
    calls: Mutex<Vec<(ScoreDimension, String)>>,
}

impl ScriptedScorer {
    fn passing() -> Self {
        Self {
            virality: HashMap::new(),
            brand: HashMap::new(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::passing()
        }
    }

    fn brand_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == ScoreDimension::Brand)
            .count()
    }
}

fn lookup(table: &HashMap<&'static str, i64>, title: &str, default: i64) -> i64 {
    table
        .iter()
        .find(|(k, _)| title.contains(*k))
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

#[async_trait]
impl ScoreOracle for ScriptedScorer {
    async fn score(&self, dim: ScoreDimension, title: &str, _summary: &str) -> Result<ScoreReport> {
        self.calls.lock().unwrap().push((dim, title.to_string()));
        if self.fail {
            return Err(FunnelError::malformed("scoring", "not json"));
        }
        Ok(match dim {
            ScoreDimension::Virality => ScoreReport {
                score: lookup(&self.virality, title, 90),
                rationale: "hook".into(),
                new_topics: Vec::new(),
            },
            ScoreDimension::Brand => ScoreReport {
                score: lookup(&self.brand, title, 80),
                rationale: "fits".into(),
                new_topics: vec![format!("more on {}", title)],
            },
        })
    }
}

/// Rejects titles containing "dull"; fails any batch containing "boom"
/// until healed.
struct KeywordGate {
    healed: AtomicBool,
}

impl KeywordGate {
    fn new() -> Self {
        Self {
            healed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BatchRelevanceOracle for KeywordGate {
    async fn filter(&self, titles: &[String]) -> Result<Vec<i64>> {
        if titles.iter().any(|t| t.contains("boom")) && !self.healed.load(Ordering::SeqCst) {
            return Err(FunnelError::transient("gatekeeper", "503"));
        }
        Ok(titles
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.contains("dull"))
            .map(|(i, _)| i as i64)
            .collect())
    }
}

struct FixedTopics(Vec<&'static str>);

#[async_trait]
impl TopicOracle for FixedTopics {
    async fn topics(&self, _prompt: TopicPrompt<'_>) -> Result<Vec<String>> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

struct DownTopics;

#[async_trait]
impl TopicOracle for DownTopics {
    async fn topics(&self, _prompt: TopicPrompt<'_>) -> Result<Vec<String>> {
        Err(FunnelError::transient("llm", "connection refused"))
    }
}

struct StaticFeed(Vec<Candidate>);

#[async_trait]
impl FeedSource for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_all(&self) -> Result<Vec<Candidate>> {
        Ok(self.0.clone())
    }
}

struct DownFeed;

#[async_trait]
impl FeedSource for DownFeed {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch_all(&self) -> Result<Vec<Candidate>> {
        Err(FunnelError::transient("feed", "502 Bad Gateway"))
    }
}

#[derive(Default)]
struct RecordingSearch {
    searched: Mutex<Vec<String>>,
}

#[async_trait]
impl TopicSearch for RecordingSearch {
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>> {
        self.searched.lock().unwrap().push(topic.to_string());
        Ok(Vec::new())
    }
}

/// In-memory store whose processed-set and topic writes always fail.
struct WriteFailingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl LeadStore for WriteFailingStore {
    async fn is_url_processed(&self, url: &str) -> Result<bool> {
        self.inner.is_url_processed(url).await
    }

    async fn mark_processed(&self, _url: &str) -> Result<()> {
        Err(FunnelError::transient("store", "database is locked"))
    }

    async fn has_similar_lead(&self, embedding: &[f32], max_distance: f32) -> Result<bool> {
        self.inner.has_similar_lead(embedding, max_distance).await
    }

    async fn insert_lead(&self, candidate: &Candidate) -> Result<String> {
        self.inner.insert_lead(candidate).await
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        self.inner.get_lead(id).await
    }

    async fn fetch_candidates_approved(&self, since: DateTime<Utc>) -> Result<Vec<Lead>> {
        self.inner.fetch_candidates_approved(since).await
    }

    async fn update_lead_status(&self, id: &str, status: LeadStatus) -> Result<bool> {
        self.inner.update_lead_status(id, status).await
    }

    async fn insert_topics(&self, _topics: &[NewTopic]) -> Result<usize> {
        Err(FunnelError::transient("store", "database is locked"))
    }

    async fn next_topic(&self) -> Result<Option<DiscoveryTopic>> {
        self.inner.next_topic().await
    }

    async fn touch_topic(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.touch_topic(id, at).await
    }

    async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<bool> {
        self.inner.set_topic_status(id, status).await
    }

    async fn list_topics(&self) -> Result<Vec<DiscoveryTopic>> {
        self.inner.list_topics().await
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats> {
        self.inner.stats(cutoff).await
    }
}

/// Shared buffer for formatted log lines.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Fakes {
    embedder: Arc<TableEmbedder>,
    scorer: Arc<ScriptedScorer>,
    gate: Arc<KeywordGate>,
    topics: Arc<dyn TopicOracle>,
}

impl Fakes {
    fn new(embedder: TableEmbedder) -> Self {
        Self {
            embedder: Arc::new(embedder),
            scorer: Arc::new(ScriptedScorer::passing()),
            gate: Arc::new(KeywordGate::new()),
            topics: Arc::new(FixedTopics(vec!["topic one", "topic two", "topic three"])),
        }
    }

    fn oracles(&self) -> Oracles {
        let off = Arc::new(DisabledOracle::new("test"));
        Oracles {
            embedder: self.embedder.clone(),
            scorer: self.scorer.clone(),
            relevance: self.gate.clone(),
            topics: self.topics.clone(),
            extractor: off.clone(),
            search: off,
        }
    }
}

fn settings() -> FunnelConfig {
    FunnelConfig {
        filter_batch_size: 2,
        ..FunnelConfig::default()
    }
}

fn cand(title: &str, n: u32) -> Candidate {
    Candidate::new(title, format!("https://news.test/{}", n), "summary", "RSS: test")
}

/// Unit vector at `similarity` cosine from `[1, 0, 0]`.
fn near_x(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0]
}

fn standard_table() -> Vec<(&'static str, Vec<f32>)> {
    vec![
        ("Shipwreck", vec![1.0, 0.0, 0.0]),
        ("Comet", vec![0.0, 1.0, 0.0]),
        ("Glacier", vec![0.0, 0.0, 1.0]),
    ]
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_candidates_become_leads_and_seed_topics() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel
        .run_batch(vec![cand("Shipwreck found", 1), cand("Comet returns", 2)])
        .await;

    assert_eq!(summary.lead_ids.len(), 2);
    assert_eq!(summary.topics_seeded, 2);
    assert_eq!(summary.topics_injected, 3);
    assert_eq!(store.leads().len(), 2);
    assert!(store.processed_urls().contains("https://news.test/1"));

    let persist = summary.stage(Stage::Persist).unwrap();
    assert_eq!((persist.input, persist.output), (2, 2));

    let topics = store.list_topics().await.unwrap();
    let seeded: Vec<_> = topics.iter().filter(|t| t.origin_lead_id.is_some()).collect();
    assert_eq!(seeded.len(), 2);
    assert!(seeded
        .iter()
        .all(|t| summary.lead_ids.contains(t.origin_lead_id.as_ref().unwrap())));
}

#[tokio::test]
async fn rerun_rejects_known_urls_without_embedding() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());
    let batch = vec![cand("Shipwreck found", 1), cand("dull council minutes", 2)];

    funnel.run_batch(batch.clone()).await;
    let embeds_after_first = fakes.embedder.calls();

    let second = funnel.run_batch(batch).await;
    assert_eq!(fakes.embedder.calls(), embeds_after_first);
    assert!(second.lead_ids.is_empty());
    assert_eq!(second.stage(Stage::UrlDedup).unwrap().output, 0);
    assert_eq!(store.leads().len(), 1);
}

#[tokio::test]
async fn same_batch_url_repeats_collapse_to_first() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let mut twin = cand("Shipwreck found again", 1);
    twin.summary = "other summary".into();
    let summary = funnel.run_batch(vec![cand("Shipwreck found", 1), twin]).await;

    let ingest = summary.stage(Stage::Ingest).unwrap();
    assert_eq!((ingest.input, ingest.output), (2, 1));
    assert_eq!(store.leads()[0].title, "Shipwreck found");
}

#[tokio::test]
async fn same_batch_near_duplicates_keep_one_lead() {
    let fakes = Fakes::new(TableEmbedder::new(vec![
        ("Shipwreck", vec![1.0, 0.0, 0.0]),
        ("Wreck", near_x(0.99)),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel
        .run_batch(vec![cand("Shipwreck found", 1), cand("Wreck discovered", 2)])
        .await;

    assert_eq!(summary.lead_ids.len(), 1);
    assert_eq!(store.leads().len(), 1);
    let processed = store.processed_urls();
    assert!(processed.contains("https://news.test/1"));
    assert!(processed.contains("https://news.test/2"));
}

#[tokio::test]
async fn similarity_threshold_is_monotonic() {
    // Cosine similarity 0.9 to the stored lead.
    for (threshold, expect_lead) in [(0.85_f32, false), (0.95_f32, true)] {
        let fakes = Fakes::new(TableEmbedder::new(vec![
            ("Shipwreck", vec![1.0, 0.0, 0.0]),
            ("Wreck", near_x(0.9)),
        ]));
        let store = Arc::new(InMemoryStore::new());
        let config = FunnelConfig {
            similarity_threshold: threshold,
            ..settings()
        };
        let funnel = Funnel::new(&config, store.clone(), &fakes.oracles());

        funnel.run_batch(vec![cand("Shipwreck found", 1)]).await;
        let summary = funnel.run_batch(vec![cand("Wreck discovered", 2)]).await;

        assert_eq!(
            !summary.lead_ids.is_empty(),
            expect_lead,
            "threshold {}",
            threshold
        );
    }
}

#[tokio::test]
async fn scoring_failure_rejects_and_marks_processed() {
    let mut fakes = Fakes::new(TableEmbedder::new(standard_table()));
    fakes.scorer = Arc::new(ScriptedScorer::failing());
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel.run_batch(vec![cand("Shipwreck found", 1)]).await;

    assert!(summary.lead_ids.is_empty());
    assert_eq!(summary.stage(Stage::Virality).unwrap().output, 0);
    assert!(store.processed_urls().contains("https://news.test/1"));
    assert_eq!(fakes.scorer.brand_calls(), 0);
}

#[tokio::test]
async fn brand_gate_runs_only_after_virality_passes() {
    let mut fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let mut scorer = ScriptedScorer::passing();
    scorer.virality.insert("Comet", 40);
    scorer.brand.insert("Glacier", 10);
    fakes.scorer = Arc::new(scorer);
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel
        .run_batch(vec![
            cand("Shipwreck found", 1),
            cand("Comet returns", 2),
            cand("Glacier retreats", 3),
        ])
        .await;

    assert_eq!(summary.lead_ids.len(), 1);
    assert_eq!(fakes.scorer.brand_calls(), 2);
    let virality = summary.stage(Stage::Virality).unwrap();
    assert_eq!((virality.input, virality.output), (3, 2));
    let brand = summary.stage(Stage::Brand).unwrap();
    assert_eq!((brand.input, brand.output), (2, 1));
    assert_eq!(store.processed_urls().len(), 3);
    // Rejected candidates leave no topics behind.
    assert_eq!(summary.topics_seeded, 1);
}

#[tokio::test]
async fn gatekeeper_outage_leaves_batch_for_next_run() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    // Batch size 2: [boom, Shipwreck] fails, [dull] is judged and rejected.
    let batch = vec![
        cand("boom Comet", 1),
        cand("Shipwreck found", 2),
        cand("dull minutes", 3),
    ];
    let first = funnel.run_batch(batch.clone()).await;
    assert_eq!(first.gatekeeper_failed_batches, 1);
    assert_eq!(first.gatekeeper_deferred, 2);
    assert!(first.lead_ids.is_empty());
    let processed = store.processed_urls();
    assert!(!processed.contains("https://news.test/1"));
    assert!(!processed.contains("https://news.test/2"));
    assert!(processed.contains("https://news.test/3"));

    fakes.gate.healed.store(true, Ordering::SeqCst);
    let second = funnel.run_batch(batch).await;
    assert_eq!(second.lead_ids.len(), 2);
}

#[tokio::test]
async fn embedding_failure_drops_without_marking() {
    let fakes = Fakes::new(TableEmbedder::failing());
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel.run_batch(vec![cand("Shipwreck found", 1)]).await;

    assert!(summary.lead_ids.is_empty());
    assert_eq!(summary.stage(Stage::SemanticDedup).unwrap().output, 0);
    assert!(store.processed_urls().is_empty());
    assert!(fakes.scorer.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_ingest_still_refuels() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel.run(SourceSelection::All).await;

    let stages: Vec<Stage> = summary.stages.iter().map(|r| r.stage).collect();
    assert_eq!(stages, vec![Stage::Ingest, Stage::Refuel]);
    assert_eq!(summary.topics_injected, 3);
    assert_eq!(fakes.embedder.calls(), 0);
}

#[tokio::test]
async fn refuel_never_duplicates_topics() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_topics(&[NewTopic::fresh("topic one")])
        .await
        .unwrap();
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let first = funnel.run_batch(Vec::new()).await;
    let second = funnel.run_batch(Vec::new()).await;

    assert_eq!(first.topics_injected, 2);
    assert_eq!(second.topics_injected, 0);
    let topics = store.list_topics().await.unwrap();
    assert_eq!(topics.len(), 3);
}

#[tokio::test]
async fn topic_search_cycles_least_recently_searched() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_topics(&[NewTopic::fresh("bog bodies"), NewTopic::fresh("lost cities")])
        .await
        .unwrap();
    let search = Arc::new(RecordingSearch::default());
    let config = FunnelConfig {
        refuel_count: 0,
        ..settings()
    };
    let funnel =
        Funnel::new(&config, store.clone(), &fakes.oracles()).with_topic_search(search.clone());

    for _ in 0..3 {
        funnel.run(SourceSelection::Search).await;
    }

    assert_eq!(
        *search.searched.lock().unwrap(),
        vec!["bog bodies", "lost cities", "bog bodies"]
    );
    let topics = store.list_topics().await.unwrap();
    assert!(topics.iter().all(|t| t.last_searched_at.is_some()));
}

#[tokio::test]
async fn source_selection_skips_feeds() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles())
        .with_feed(Arc::new(StaticFeed(vec![cand("Shipwreck found", 1)])));

    let search_only = funnel.run(SourceSelection::Search).await;
    assert_eq!(search_only.stage(Stage::Ingest).unwrap().input, 0);

    let rss = funnel.run(SourceSelection::Rss).await;
    assert_eq!(rss.lead_ids.len(), 1);
}

#[tokio::test]
async fn candidate_cap_applies_before_dedup() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let config = FunnelConfig {
        max_candidates: Some(1),
        ..settings()
    };
    let funnel = Funnel::new(&config, store.clone(), &fakes.oracles());

    let summary = funnel
        .run_batch(vec![cand("Shipwreck found", 1), cand("Comet returns", 2)])
        .await;

    let cap = summary.stage(Stage::Cap).unwrap();
    assert_eq!((cap.input, cap.output), (2, 1));
    assert_eq!(summary.lead_ids.len(), 1);
    assert!(!store.processed_urls().contains("https://news.test/2"));
}

#[tokio::test]
async fn sqlite_store_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = Config::minimal(dir.path().join("funnel.sqlite"));
    let store = Arc::new(SqliteStore::open(&config, RetryPolicy::no_retry()).await.unwrap());
    let fakes = Fakes::new(TableEmbedder::new(vec![
        ("Shipwreck", vec![1.0, 0.0, 0.0]),
        ("Wreck", near_x(0.99)),
        ("Comet", vec![0.0, 1.0, 0.0]),
    ]));
    let shared: Arc<dyn LeadStore> = store.clone();
    let funnel = Funnel::new(&settings(), shared, &fakes.oracles());

    let first = funnel
        .run_batch(vec![cand("Shipwreck found", 1), cand("Comet returns", 2)])
        .await;
    assert_eq!(first.lead_ids.len(), 2);

    let second = funnel
        .run_batch(vec![cand("Shipwreck found", 1), cand("Wreck discovered", 3)])
        .await;
    assert!(second.lead_ids.is_empty());
    assert!(store.is_url_processed("https://news.test/3").await.unwrap());

    let lead = store.get_lead(&first.lead_ids[0]).await.unwrap().unwrap();
    assert_eq!(lead.virality_score, 90);
    assert_eq!(lead.brand_score, 80);
    assert_eq!(lead.embedding.len(), 3);

    store.close().await;
}

#[tokio::test]
async fn virality_threshold_is_monotonic() {
    let mut accepted: Vec<HashSet<String>> = Vec::new();
    for threshold in [70, 85] {
        let mut fakes = Fakes::new(TableEmbedder::new(standard_table()));
        let mut scorer = ScriptedScorer::passing();
        scorer.virality.insert("Shipwreck", 95);
        scorer.virality.insert("Comet", 80);
        scorer.virality.insert("Glacier", 60);
        fakes.scorer = Arc::new(scorer);
        let store = Arc::new(InMemoryStore::new());
        let config = FunnelConfig {
            virality_threshold: threshold,
            ..settings()
        };
        let funnel = Funnel::new(&config, store.clone(), &fakes.oracles());

        funnel
            .run_batch(vec![
                cand("Shipwreck found", 1),
                cand("Comet returns", 2),
                cand("Glacier retreats", 3),
            ])
            .await;
        accepted.push(store.leads().into_iter().map(|l| l.url).collect());
    }

    let (low, high) = (&accepted[0], &accepted[1]);
    assert_eq!(low.len(), 2);
    assert_eq!(high.len(), 1);
    assert!(high.is_subset(low));
}

#[tokio::test]
async fn topic_oracle_outage_refuels_from_fallback_list() {
    let mut fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let down: Arc<dyn TopicOracle> = Arc::new(DownTopics);
    fakes.topics = down;
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles());

    let summary = funnel.run_batch(vec![cand("Shipwreck found", 1)]).await;

    assert_eq!(summary.lead_ids.len(), 1);
    let refuel_count = settings().refuel_count;
    assert!(summary.topics_injected > 0);
    assert!(summary.topics_injected <= refuel_count);
    let fallback: Vec<_> = store
        .list_topics()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.origin_lead_id.is_none())
        .collect();
    assert_eq!(fallback.len(), summary.topics_injected);
}

#[tokio::test]
async fn failing_feed_does_not_block_other_feeds() {
    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(InMemoryStore::new());
    let funnel = Funnel::new(&settings(), store.clone(), &fakes.oracles())
        .with_feed(Arc::new(DownFeed))
        .with_feed(Arc::new(StaticFeed(vec![
            cand("Shipwreck found", 1),
            cand("Comet returns", 2),
        ])));

    let summary = funnel.run(SourceSelection::Rss).await;

    assert_eq!(summary.stage(Stage::Ingest).unwrap().input, 2);
    assert_eq!(summary.lead_ids.len(), 2);
    assert_eq!(store.leads().len(), 2);
}

#[tokio::test]
async fn write_failures_are_logged_with_their_stage() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let fakes = Fakes::new(TableEmbedder::new(standard_table()));
    let store = Arc::new(WriteFailingStore {
        inner: InMemoryStore::new(),
    });
    let funnel = Funnel::new(&settings(), store, &fakes.oracles());

    let summary = funnel.run_batch(vec![cand("Shipwreck found", 1)]).await;
    assert_eq!(summary.lead_ids.len(), 1);
    assert_eq!(summary.topics_seeded, 0);
    assert_eq!(summary.topics_injected, 0);

    let logs = capture.contents();
    let marking: Vec<&str> = logs
        .lines()
        .filter(|l| l.contains("failed to mark url processed"))
        .collect();
    assert!(!marking.is_empty(), "logs: {}", logs);
    assert!(marking.iter().all(|l| l.contains("stage=\"persist\"")));

    let topic_writes: Vec<&str> = logs
        .lines()
        .filter(|l| l.contains("failed to insert topics"))
        .collect();
    assert_eq!(topic_writes.len(), 2, "logs: {}", logs);
    assert!(topic_writes[0].contains("stage=\"persist\""));
    assert!(topic_writes[1].contains("stage=\"refuel\""));
}
