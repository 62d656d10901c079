//! Text and URL normalization at the ingestion boundary.
//!
//! Raw feed and search output is full of markup, entities, and tracking
//! parameters. Everything is cleaned here once, so the rest of the funnel
//! compares canonical strings.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Candidate;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_hsenc", "_hsmi", "igshid", "ref",
    "ref_src",
];

/// Default cap for summaries sent to the scoring oracles.
pub const MAX_SUMMARY_CHARS: usize = 1500;

/// Wrap width handed to the HTML renderer. Line breaks are collapsed
/// afterwards, so this only needs to exceed any single word.
const RENDER_WIDTH: usize = 4096;

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Render HTML to plain text, then collapse whitespace.
///
/// Only parsed elements are dropped. Entities come out as the characters
/// they encode, and a bare `<` or `>` in prose is kept.
pub fn clean_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let rendered = html2text::config::plain_no_decorate()
        .string_from_read(raw.as_bytes(), RENDER_WIDTH)
        .unwrap_or_else(|_| raw.to_string());
    let spaced = rendered.replace('\u{00A0}', " ");
    ws_re().replace_all(spaced.trim(), " ").into_owned()
}

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Canonical form of a story URL, used as the dedup key.
///
/// Trims whitespace, drops the fragment, and strips `utm_*` and other
/// tracking parameters. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Ok(mut parsed) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| {
                let key = key.to_ascii_lowercase();
                !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    parsed.to_string()
}

/// Build a validated [`Candidate`] from raw ingested fields.
///
/// Returns `None` when the cleaned title or URL is empty; nothing
/// downstream has to check for missing keys.
pub fn candidate_from_raw(
    title: &str,
    url: &str,
    summary: &str,
    source_origin: impl Into<String>,
) -> Option<Candidate> {
    let title = clean_text(title);
    let url = normalize_url(url);
    if title.is_empty() || url.is_empty() {
        return None;
    }
    let summary = truncate(&clean_text(summary), MAX_SUMMARY_CHARS);
    Some(Candidate::new(title, url, summary, source_origin))
}
