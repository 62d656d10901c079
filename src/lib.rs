//! # Lead Funnel
//!
//! A multi-stage funnel that turns a stream of story candidates into a
//! small set of durable, de-duplicated leads, and feeds what it learns
//! back into its own search topics.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────────┐
//! │   Sources    │──▶│  URL dedup │──▶│ Gatekeeper │──▶│ Semantic     │
//! │ RSS / search │   │            │   │  (batched) │   │ dedup        │
//! └──────▲───────┘   └────────────┘   └────────────┘   └──────┬───────┘
//!        │                                                    ▼
//! ┌──────┴───────┐   ┌────────────┐   ┌────────────┐   ┌──────────────┐
//! │  Discovery   │◀──│  Persist   │◀──│ Brand gate │◀──│ Virality     │
//! │  topics      │   │  (SQLite)  │   │            │   │ gate         │
//! └──────────────┘   └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! funnel init                        # create database
//! funnel topics add "bog bodies"     # seed the discovery pool
//! funnel run                         # one pass through the funnel
//! funnel leads list --since 2026-10-01
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Candidates, leads, topics |
//! | [`store`] | Storage trait and in-memory store |
//! | [`sqlite_store`] | SQLite-backed store |
//! | [`embedding`] | Embedding provider and vector helpers |
//! | [`oracle`] | Scoring, relevance, topic, and search seams |
//! | [`llm`] | Chat-completion client behind the oracles |
//! | [`sources`] | RSS and topic-search ingestion |
//! | [`dedup`] | URL and semantic deduplication |
//! | [`gatekeeper`] | Batched relevance pre-filter |
//! | [`scoring`] | Virality and brand gates |
//! | [`discovery`] | Topic refuel |
//! | [`workflow`] | The funnel orchestrator |

pub mod config;
pub mod db;
pub mod dedup;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod gatekeeper;
pub mod leads;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod oracle;
pub mod retry;
pub mod scoring;
pub mod search;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod text;
pub mod topics;
pub mod workflow;
