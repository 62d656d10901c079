//! `funnel topics`: inspect and seed the discovery pool.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::models::NewTopic;
use crate::oracle::Oracles;
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::store::LeadStore;

pub async fn run_topics_list(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let topics = store.list_topics().await?;

    if topics.is_empty() {
        println!("No discovery topics.");
    }
    for t in &topics {
        let searched = t
            .last_searched_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<10} {:<18} {}",
            t.status.as_str(),
            searched,
            t.topic
        );
    }

    store.close().await;
    Ok(())
}

pub async fn run_topics_add(config: &Config, topics: &[String]) -> Result<()> {
    let new: Vec<NewTopic> = topics
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(NewTopic::fresh)
        .collect();

    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let inserted = store.insert_topics(&new).await?;
    store.close().await;

    println!("  added:     {}", inserted);
    println!("  skipped:   {}", new.len() - inserted);
    Ok(())
}

/// Generate topics without running the funnel.
pub async fn run_topics_refuel(config: &Config, count: Option<usize>) -> Result<()> {
    let oracles = Oracles::from_config(config).context("Failed to build providers")?;
    let engine = DiscoveryEngine::new(oracles.topics.clone(), config.funnel.discovery_strategy);
    let generated = engine
        .refuel(count.unwrap_or(config.funnel.refuel_count))
        .await;

    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let new: Vec<NewTopic> = generated.iter().map(NewTopic::fresh).collect();
    let inserted = store.insert_topics(&new).await?;
    store.close().await;

    for t in &generated {
        println!("  {}", t);
    }
    println!("  generated: {}", generated.len());
    println!("  added:     {}", inserted);
    Ok(())
}
