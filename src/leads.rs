//! Curation surface: list recent leads and move them through their
//! editorial lifecycle.
//!
//! Used by `funnel leads list` and `funnel leads set-status`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::Config;
use crate::models::{Lead, LeadStatus};
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::store::LeadStore;

/// Lookback used by `leads list` when `--since` is not given.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_since(date: &str) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", date))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid date '{}'", date))?;
    Ok(midnight.and_utc())
}

pub async fn run_leads_list(config: &Config, since: Option<&str>) -> Result<()> {
    let since = match since {
        Some(s) => parse_since(s)?,
        None => Utc::now() - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };

    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let leads = store.fetch_candidates_approved(since).await?;

    if leads.is_empty() {
        println!("No leads since {}.", since.format("%Y-%m-%d"));
    } else {
        for lead in &leads {
            print_lead(lead);
        }
        println!("{} lead(s).", leads.len());
    }

    store.close().await;
    Ok(())
}

fn print_lead(lead: &Lead) {
    println!("{}", lead.title);
    println!("  id:        {}", lead.id);
    println!("  url:       {}", lead.url);
    println!("  status:    {}", lead.status);
    println!(
        "  scores:    virality {} / brand {}",
        lead.virality_score, lead.brand_score
    );
    if !lead.viral_hook.is_empty() {
        println!("  hook:      {}", lead.viral_hook);
    }
    println!("  origin:    {}", lead.source_origin);
    println!("  created:   {}", lead.created_at.format("%Y-%m-%d %H:%M"));
    println!();
}

pub async fn run_set_status(config: &Config, id: &str, status: &str) -> Result<()> {
    let status: LeadStatus = status.parse().map_err(anyhow::Error::msg)?;

    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let updated = store.update_lead_status(id, status).await?;
    store.close().await;

    if !updated {
        bail!("lead not found: {}", id);
    }
    println!("{}: {}", id, status);
    Ok(())
}
