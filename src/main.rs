//! # Lead Funnel CLI (`funnel`)
//!
//! The `funnel` binary drives the lead funnel: database setup, funnel runs,
//! the discovery topic pool, and lead curation.
//!
//! ## Usage
//!
//! ```bash
//! funnel --config ./config/funnel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `funnel init` | Create the SQLite database and run schema migrations |
//! | `funnel check` | Validate config and show which providers are enabled |
//! | `funnel run` | Ingest, filter, score, persist, and refuel |
//! | `funnel stats` | Lead, topic, and processed-URL counts |
//! | `funnel topics list` | Show the discovery pool |
//! | `funnel topics add <topic>...` | Seed topics by hand |
//! | `funnel topics refuel` | Generate topics without a run |
//! | `funnel leads list` | Leads awaiting curation |
//! | `funnel leads set-status <id> <status>` | Move a lead through curation |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `lead_funnel=info`); command output goes to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lead_funnel::config::{self, Config};
use lead_funnel::embedding::EmbeddingOracle;
use lead_funnel::oracle::Oracles;
use lead_funnel::retry::RetryPolicy;
use lead_funnel::sqlite_store::SqliteStore;
use lead_funnel::store::LeadStore;
use lead_funnel::workflow::{Funnel, RunSummary, SourceSelection};
use lead_funnel::{leads, migrate, stats, topics};

#[derive(Parser)]
#[command(
    name = "funnel",
    about = "Lead funnel: ingest stories, filter and score them, keep the discovery pool fed",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/funnel.toml`.
    #[arg(long, global = true, default_value = "./config/funnel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the leads, processed_urls and
    /// discovery_topics tables. Safe to run repeatedly.
    Init,

    /// Validate configuration and report provider status.
    Check,

    /// Run the funnel once.
    Run {
        /// Ingestion sources: `all`, `rss`, or `search`.
        #[arg(long, default_value = "all")]
        source: SourceSelection,

        /// Cap on candidates entering dedup; overrides `funnel.max_candidates`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show lead, topic, and processed-URL counts.
    Stats,

    /// Manage discovery topics.
    Topics {
        #[command(subcommand)]
        action: TopicsAction,
    },

    /// Curate leads.
    Leads {
        #[command(subcommand)]
        action: LeadsAction,
    },
}

#[derive(Subcommand)]
enum TopicsAction {
    /// List every topic with its status and last search time.
    List,

    /// Add topics by hand. Existing topics are skipped.
    Add {
        #[arg(required = true)]
        topics: Vec<String>,
    },

    /// Generate new topics with the configured discovery strategy.
    Refuel {
        /// How many topics to ask for; defaults to `funnel.refuel_count`.
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Subcommand)]
enum LeadsAction {
    /// Leads still `new` or `approved`, newest first.
    List {
        /// Only leads created on or after this date (YYYY-MM-DD).
        /// Defaults to the last 7 days.
        #[arg(long)]
        since: Option<String>,
    },

    /// Set a lead's status: new, approved, rejected, or published.
    SetStatus { id: String, status: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lead_funnel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Check => run_check(&cfg)?,
        Commands::Run { source, limit } => run_funnel(cfg, source, limit).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
        Commands::Topics { action } => match action {
            TopicsAction::List => topics::run_topics_list(&cfg).await?,
            TopicsAction::Add { topics: new } => topics::run_topics_add(&cfg, &new).await?,
            TopicsAction::Refuel { count } => topics::run_topics_refuel(&cfg, count).await?,
        },
        Commands::Leads { action } => match action {
            LeadsAction::List { since } => leads::run_leads_list(&cfg, since.as_deref()).await?,
            LeadsAction::SetStatus { id, status } => {
                leads::run_set_status(&cfg, &id, &status).await?
            }
        },
    }

    Ok(())
}

fn run_check(cfg: &Config) -> anyhow::Result<()> {
    let oracles = Oracles::from_config(cfg).context("Provider configuration is invalid")?;

    println!("  database:   {}", cfg.db.path.display());
    println!(
        "  embedding:  {}",
        provider_line(&cfg.embedding.provider, oracles.embedder.model_name())
    );
    println!("  llm:        {}", provider_line(&cfg.llm.provider, &cfg.llm.model_main));
    println!("  search:     {}", provider_line(&cfg.search.provider, &cfg.search.model));
    println!("  feeds:      {}", cfg.sources.rss_feeds.len());
    println!(
        "  thresholds: similarity {} / virality {} / brand {}",
        cfg.funnel.similarity_threshold, cfg.funnel.virality_threshold, cfg.funnel.brand_threshold
    );
    println!("Configuration OK.");
    Ok(())
}

fn provider_line(provider: &str, model: &str) -> String {
    if provider == "disabled" {
        "disabled".to_string()
    } else {
        format!("{} ({})", provider, model)
    }
}

async fn run_funnel(
    mut cfg: Config,
    source: SourceSelection,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    if limit.is_some() {
        cfg.funnel.max_candidates = limit;
    }

    let oracles = Oracles::from_config(&cfg).context("Failed to build providers")?;
    let store = Arc::new(SqliteStore::open(&cfg, RetryPolicy::from_config(&cfg.retry)).await?);
    let shared: Arc<dyn LeadStore> = store.clone();
    let funnel = Funnel::from_config(&cfg, shared, &oracles)?;

    let summary = funnel.run(source).await;
    print_summary(&summary);

    store.close().await;
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.stages {
        println!(
            "  {:<15} {:>5} -> {}",
            format!("{}:", report.stage),
            report.input,
            report.output
        );
    }
    if !summary.topics_searched.is_empty() {
        println!("  searched:       {}", summary.topics_searched.join(", "));
    }
    if summary.gatekeeper_failed_batches > 0 {
        println!("  failed batches: {}", summary.gatekeeper_failed_batches);
        println!("  deferred:       {}", summary.gatekeeper_deferred);
    }
    println!("  leads:          {}", summary.lead_ids.len());
    println!("  topics seeded:  {}", summary.topics_seeded);
    println!("  topics added:   {}", summary.topics_injected);
}
