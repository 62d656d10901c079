use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on a fresh database. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply every migration against an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Column names and status strings are read by downstream curation.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            summary TEXT NOT NULL DEFAULT '',
            embedding BLOB,
            brand_score INTEGER NOT NULL DEFAULT 0,
            virality_score INTEGER NOT NULL DEFAULT 0,
            viral_hook TEXT NOT NULL DEFAULT '',
            source_origin TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'new'
                CHECK (status IN ('new', 'approved', 'rejected', 'published')),
            published_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_urls (
            url TEXT PRIMARY KEY,
            processed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discovery_topics (
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL UNIQUE,
            origin_lead_id TEXT,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'exhausted')),
            last_searched_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_topics_selection ON discovery_topics(status, last_searched_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
