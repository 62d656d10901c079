//! Funnel statistics.
//!
//! A quick summary of what the funnel has produced: lead counts by status,
//! leads created today, the strongest brand fits, the shape of the
//! discovery pool, and the size of the processed-URL set. Used by
//! `funnel stats`.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::store::{LeadStore, StoreStats};

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config, RetryPolicy::from_config(&config.retry)).await?;
    let stats = store.stats(start_of_today()).await?;
    store.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lead Funnel Stats");
    println!("=================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    print!("{}", render(&stats));
    println!();
    Ok(())
}

/// Midnight UTC of the current day.
fn start_of_today() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now)
}

/// The body of the stats report.
pub fn render(stats: &StoreStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Leads:       {}\n", stats.total_leads));
    for (status, count) in &stats.leads_by_status {
        out.push_str(&format!("    {:<12} {}\n", status, count));
    }
    out.push_str(&format!("  Today:       {}\n", stats.leads_since_cutoff));
    out.push_str(&format!("  Processed:   {}\n", stats.processed_urls));

    let topics: i64 = stats.topics_by_status.iter().map(|(_, n)| n).sum();
    out.push_str(&format!("  Topics:      {}\n", topics));
    for (status, count) in &stats.topics_by_status {
        out.push_str(&format!("    {:<12} {}\n", status, count));
    }

    if !stats.top_brand.is_empty() {
        out.push('\n');
        out.push_str("  Top brand fit:\n");
        out.push_str(&format!(
            "  {:>5} {:>5}   {:<14} {}\n",
            "BRAND", "VIRAL", "CREATED", "TITLE"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(60)));
        for lead in &stats.top_brand {
            out.push_str(&format!(
                "  {:>5} {:>5}   {:<14} {}\n",
                lead.brand_score,
                lead.virality_score,
                format_relative(lead.created_at),
                lead.title
            ));
        }
    }
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();

    if delta < 0 {
        return at.format("%Y-%m-%d").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_times() {
        assert_eq!(format_relative(Utc::now()), "just now");
        assert_eq!(format_relative(Utc::now() - Duration::hours(2)), "2 hours ago");
        assert_eq!(format_relative(Utc::now() - Duration::days(1)), "1 day ago");
    }

    #[test]
    fn render_lists_statuses() {
        let stats = StoreStats {
            total_leads: 3,
            leads_by_status: vec![("approved".into(), 1), ("new".into(), 2)],
            leads_since_cutoff: 2,
            top_brand: Vec::new(),
            topics_by_status: vec![("active".into(), 4)],
            processed_urls: 10,
        };
        let text = render(&stats);
        assert!(text.contains("Leads:       3"));
        assert!(text.contains("approved"));
        assert!(text.contains("Topics:      4"));
        assert!(!text.contains("Top brand fit"));
    }
}
