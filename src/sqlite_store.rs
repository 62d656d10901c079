//! SQLite-backed [`LeadStore`] implementation.
//!
//! Every statement runs through the shared [`RetryPolicy`], so a locked
//! database or an exhausted pool is retried like any other transient
//! failure. Timestamps are stored as Unix milliseconds and embeddings as
//! little-endian `f32` BLOBs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::{FunnelError, Result};
use crate::migrate;
use crate::models::{Candidate, DiscoveryTopic, Lead, LeadStatus, NewTopic, TopicStatus};
use crate::retry::RetryPolicy;
use crate::store::{LeadStore, StoreStats, TOP_BRAND_LIMIT};

const LEAD_COLUMNS: &str = "id, title, url, summary, embedding, brand_score, virality_score, \
     viral_hook, source_origin, status, published_at, created_at";

const TOPIC_COLUMNS: &str = "id, topic, origin_lead_id, status, last_searched_at, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config, retry: RetryPolicy) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool, retry))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let status: String = row.try_get("status")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    let published_at: Option<i64> = row.try_get("published_at")?;
    Ok(Lead {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        summary: row.try_get("summary")?,
        embedding: embedding.map(|b| blob_to_vec(&b)).unwrap_or_default(),
        brand_score: row.try_get("brand_score")?,
        virality_score: row.try_get("virality_score")?,
        viral_hook: row.try_get("viral_hook")?,
        source_origin: row.try_get("source_origin")?,
        status: status.parse().map_err(FunnelError::Store)?,
        published_at: published_at.map(from_ms),
        created_at: from_ms(row.try_get("created_at")?),
    })
}

fn topic_from_row(row: &SqliteRow) -> Result<DiscoveryTopic> {
    let status: String = row.try_get("status")?;
    let last_searched_at: Option<i64> = row.try_get("last_searched_at")?;
    Ok(DiscoveryTopic {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        origin_lead_id: row.try_get("origin_lead_id")?,
        status: status.parse().map_err(FunnelError::Store)?,
        last_searched_at: last_searched_at.map(from_ms),
        created_at: from_ms(row.try_get("created_at")?),
    })
}

async fn count_by_status(pool: &SqlitePool, table: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(&format!(
        "SELECT status, COUNT(*) AS n FROM {} GROUP BY status ORDER BY status",
        table
    ))
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| -> Result<(String, i64)> { Ok((r.try_get("status")?, r.try_get("n")?)) })
        .collect()
}

/// Stream lead embeddings and stop at the first one inside the cutoff.
async fn scan_similar(pool: &SqlitePool, embedding: &[f32], max_distance: f32) -> Result<bool> {
    let mut rows = sqlx::query("SELECT embedding FROM leads WHERE embedding IS NOT NULL").fetch(pool);
    while let Some(row) = rows.try_next().await? {
        let blob: Vec<u8> = row.try_get("embedding")?;
        let stored = blob_to_vec(&blob);
        if !stored.is_empty() && cosine_distance(embedding, &stored) < max_distance {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn collect_stats(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<StoreStats> {
    let total_leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(pool)
        .await?;
    let leads_since_cutoff: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE created_at >= ?")
        .bind(to_ms(cutoff))
        .fetch_one(pool)
        .await?;
    let processed_urls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_urls")
        .fetch_one(pool)
        .await?;

    let top_rows = sqlx::query(&format!(
        "SELECT {} FROM leads ORDER BY brand_score DESC, created_at DESC LIMIT ?",
        LEAD_COLUMNS
    ))
    .bind(TOP_BRAND_LIMIT as i64)
    .fetch_all(pool)
    .await?;
    let top_brand = top_rows.iter().map(lead_from_row).collect::<Result<Vec<_>>>()?;

    Ok(StoreStats {
        total_leads,
        leads_by_status: count_by_status(pool, "leads").await?,
        leads_since_cutoff,
        top_brand,
        topics_by_status: count_by_status(pool, "discovery_topics").await?,
        processed_urls,
    })
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn is_url_processed(&self, url: &str) -> Result<bool> {
        let pool = &self.pool;
        self.retry
            .run("store", move || async move {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM processed_urls WHERE url = ?)
                         OR EXISTS(SELECT 1 FROM leads WHERE url = ?)",
                )
                .bind(url)
                .bind(url)
                .fetch_one(pool)
                .await
                .map_err(FunnelError::from)
            })
            .await
    }

    async fn mark_processed(&self, url: &str) -> Result<()> {
        let pool = &self.pool;
        let now = to_ms(Utc::now());
        self.retry
            .run("store", move || async move {
                sqlx::query(
                    "INSERT INTO processed_urls (url, processed_at) VALUES (?, ?)
                     ON CONFLICT(url) DO NOTHING",
                )
                .bind(url)
                .bind(now)
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(FunnelError::from)
            })
            .await
    }

    async fn has_similar_lead(&self, embedding: &[f32], max_distance: f32) -> Result<bool> {
        let pool = &self.pool;
        self.retry
            .run("store", move || scan_similar(pool, embedding, max_distance))
            .await
    }

    async fn insert_lead(&self, candidate: &Candidate) -> Result<String> {
        let pool = &self.pool;
        let id = uuid::Uuid::new_v4().to_string();
        let id_ref = id.as_str();
        let blob = candidate.embedding.as_deref().map(vec_to_blob);
        let blob_ref = blob.as_deref();
        let now = to_ms(Utc::now());

        let result = self
            .retry
            .run("store", move || async move {
                sqlx::query(
                    r#"
                    INSERT INTO leads (id, title, url, summary, embedding, brand_score,
                                       virality_score, viral_hook, source_origin, status,
                                       published_at, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'new', ?, ?)
                    "#,
                )
                .bind(id_ref)
                .bind(&candidate.title)
                .bind(&candidate.url)
                .bind(&candidate.summary)
                .bind(blob_ref)
                .bind(candidate.brand_score)
                .bind(candidate.virality_score)
                .bind(&candidate.viral_hook)
                .bind(&candidate.source_origin)
                .bind(candidate.published_at.map(to_ms))
                .bind(now)
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(FunnelError::from)
            })
            .await;

        match result {
            Ok(()) => Ok(id),
            Err(e) if e.is_duplicate() => Err(FunnelError::DuplicateConflict {
                entity: "lead",
                key: candidate.url.clone(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("store", move || async move {
                sqlx::query(&format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS))
                    .bind(id)
                    .fetch_optional(pool)
                    .await
                    .map_err(FunnelError::from)
            })
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    async fn fetch_candidates_approved(&self, since: DateTime<Utc>) -> Result<Vec<Lead>> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("store", move || async move {
                sqlx::query(&format!(
                    "SELECT {} FROM leads
                     WHERE created_at >= ? AND status NOT IN ('rejected', 'published')
                     ORDER BY created_at DESC, rowid DESC",
                    LEAD_COLUMNS
                ))
                .bind(to_ms(since))
                .fetch_all(pool)
                .await
                .map_err(FunnelError::from)
            })
            .await?;
        rows.iter().map(lead_from_row).collect()
    }

    async fn update_lead_status(&self, id: &str, status: LeadStatus) -> Result<bool> {
        let pool = &self.pool;
        self.retry
            .run("store", move || async move {
                sqlx::query("UPDATE leads SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected() > 0)
                    .map_err(FunnelError::from)
            })
            .await
    }

    async fn insert_topics(&self, topics: &[NewTopic]) -> Result<usize> {
        let pool = &self.pool;
        let mut inserted = 0;
        for nt in topics {
            let id = uuid::Uuid::new_v4().to_string();
            let id_ref = id.as_str();
            let now = to_ms(Utc::now());
            let affected = self
                .retry
                .run("store", move || async move {
                    sqlx::query(
                        "INSERT INTO discovery_topics (id, topic, origin_lead_id, status, created_at)
                         VALUES (?, ?, ?, 'active', ?)
                         ON CONFLICT(topic) DO NOTHING",
                    )
                    .bind(id_ref)
                    .bind(&nt.topic)
                    .bind(nt.origin_lead_id.as_deref())
                    .bind(now)
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(FunnelError::from)
                })
                .await?;
            inserted += affected as usize;
        }
        Ok(inserted)
    }

    async fn next_topic(&self) -> Result<Option<DiscoveryTopic>> {
        let pool = &self.pool;
        let row = self
            .retry
            .run("store", move || async move {
                sqlx::query(&format!(
                    "SELECT {} FROM discovery_topics
                     WHERE status = 'active'
                     ORDER BY last_searched_at ASC NULLS FIRST, created_at ASC, rowid ASC
                     LIMIT 1",
                    TOPIC_COLUMNS
                ))
                .fetch_optional(pool)
                .await
                .map_err(FunnelError::from)
            })
            .await?;
        row.as_ref().map(topic_from_row).transpose()
    }

    async fn touch_topic(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let pool = &self.pool;
        self.retry
            .run("store", move || async move {
                sqlx::query("UPDATE discovery_topics SET last_searched_at = ? WHERE id = ?")
                    .bind(to_ms(at))
                    .bind(id)
                    .execute(pool)
                    .await
                    .map(|_| ())
                    .map_err(FunnelError::from)
            })
            .await
    }

    async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<bool> {
        let pool = &self.pool;
        self.retry
            .run("store", move || async move {
                sqlx::query("UPDATE discovery_topics SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(pool)
                    .await
                    .map(|r| r.rows_affected() > 0)
                    .map_err(FunnelError::from)
            })
            .await
    }

    async fn list_topics(&self) -> Result<Vec<DiscoveryTopic>> {
        let pool = &self.pool;
        let rows = self
            .retry
            .run("store", move || async move {
                sqlx::query(&format!(
                    "SELECT {} FROM discovery_topics ORDER BY created_at ASC, rowid ASC",
                    TOPIC_COLUMNS
                ))
                .fetch_all(pool)
                .await
                .map_err(FunnelError::from)
            })
            .await?;
        rows.iter().map(topic_from_row).collect()
    }

    async fn stats(&self, cutoff: DateTime<Utc>) -> Result<StoreStats> {
        let pool = &self.pool;
        self.retry
            .run("store", move || collect_stats(pool, cutoff))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let config = Config::minimal(dir.path().join("data/funnel.sqlite"));
        let store = SqliteStore::open(&config, RetryPolicy::no_retry())
            .await
            .unwrap();
        (dir, store)
    }

    fn candidate(url: &str, embedding: Vec<f32>) -> Candidate {
        let mut c = Candidate::new("Lost city mapped", url, "Lidar survey", "RSS: test");
        c.embedding = Some(embedding);
        c.virality_score = 82;
        c.brand_score = 74;
        c.viral_hook = "hidden in plain sight".into();
        c
    }

    #[tokio::test]
    async fn lead_round_trips_with_embedding() {
        let (_dir, store) = open_temp().await;
        let id = store
            .insert_lead(&candidate("https://a.test/1", vec![0.25, -1.5, 3.0]))
            .await
            .unwrap();

        let lead = store.get_lead(&id).await.unwrap().unwrap();
        assert_eq!(lead.url, "https://a.test/1");
        assert_eq!(lead.embedding, vec![0.25, -1.5, 3.0]);
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.virality_score, 82);
        assert!(store.is_url_processed("https://a.test/1").await.unwrap());
    }

    #[tokio::test]
    async fn curation_window_includes_its_start() {
        let (_dir, store) = open_temp().await;
        let id = store
            .insert_lead(&candidate("https://a.test/1", vec![1.0]))
            .await
            .unwrap();
        let created = store.get_lead(&id).await.unwrap().unwrap().created_at;

        let on_the_boundary = store.fetch_candidates_approved(created).await.unwrap();
        assert_eq!(on_the_boundary.len(), 1);

        let later = created + chrono::Duration::milliseconds(1);
        assert!(store.fetch_candidates_approved(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_url_is_a_conflict() {
        let (_dir, store) = open_temp().await;
        let c = candidate("https://a.test/1", vec![1.0, 0.0]);
        store.insert_lead(&c).await.unwrap();
        let err = store.insert_lead(&c).await.unwrap_err();
        assert!(matches!(err, FunnelError::DuplicateConflict { entity: "lead", .. }));
    }

    #[tokio::test]
    async fn processed_marking_is_idempotent() {
        let (_dir, store) = open_temp().await;
        store.mark_processed("https://a.test/x").await.unwrap();
        store.mark_processed("https://a.test/x").await.unwrap();
        assert!(store.is_url_processed("https://a.test/x").await.unwrap());
        assert!(!store.is_url_processed("https://a.test/y").await.unwrap());
    }

    #[tokio::test]
    async fn similarity_query_finds_near_vectors() {
        let (_dir, store) = open_temp().await;
        store
            .insert_lead(&candidate("https://a.test/1", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert!(store.has_similar_lead(&[0.99, 0.05, 0.0], 0.15).await.unwrap());
        assert!(!store.has_similar_lead(&[0.0, 1.0, 0.0], 0.15).await.unwrap());
    }

    #[tokio::test]
    async fn topics_rotate_least_recently_searched_first() {
        let (_dir, store) = open_temp().await;
        let inserted = store
            .insert_topics(&[
                NewTopic::fresh("sunken ships"),
                NewTopic::fresh("cave art"),
                NewTopic::fresh("sunken ships"),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let first = store.next_topic().await.unwrap().unwrap();
        assert_eq!(first.topic, "sunken ships");
        store.touch_topic(&first.id, Utc::now()).await.unwrap();

        let second = store.next_topic().await.unwrap().unwrap();
        assert_eq!(second.topic, "cave art");
        store
            .touch_topic(&second.id, Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(store.next_topic().await.unwrap().unwrap().topic, "sunken ships");
    }

    #[tokio::test]
    async fn exhausted_topics_are_never_selected() {
        let (_dir, store) = open_temp().await;
        store.insert_topics(&[NewTopic::fresh("only")]).await.unwrap();
        let t = store.next_topic().await.unwrap().unwrap();
        assert!(store.set_topic_status(&t.id, TopicStatus::Exhausted).await.unwrap());
        assert!(store.next_topic().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_reflect_contents() {
        let (_dir, store) = open_temp().await;
        let id = store
            .insert_lead(&candidate("https://a.test/1", vec![1.0]))
            .await
            .unwrap();
        store
            .insert_lead(&candidate("https://a.test/2", vec![1.0]))
            .await
            .unwrap();
        store.update_lead_status(&id, LeadStatus::Approved).await.unwrap();
        store.mark_processed("https://a.test/3").await.unwrap();
        store.insert_topics(&[NewTopic::fresh("t")]).await.unwrap();

        let stats = store.stats(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(stats.total_leads, 2);
        assert_eq!(stats.leads_since_cutoff, 2);
        assert_eq!(
            stats.leads_by_status,
            vec![("approved".to_string(), 1), ("new".to_string(), 1)]
        );
        assert_eq!(stats.topics_by_status, vec![("active".to_string(), 1)]);
        assert_eq!(stats.processed_urls, 1);
        assert_eq!(stats.top_brand.len(), 2);
    }
}
