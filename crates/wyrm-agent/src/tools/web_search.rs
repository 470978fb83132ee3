//! The web-search tool: tag parsing and result formatting
//!
//! The search itself is an external collaborator behind `SearchProvider`;
//! this module owns the tag machinery and the text handed back to the
//! model. Execution is gated on table approval by the orchestrator.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[WEB_SEARCH\](.*?)\[/WEB_SEARCH\]").unwrap());

static STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\s*\[WEB_SEARCH\].*?\[/WEB_SEARCH\]\s*").unwrap());

/// Whether the text contains a well-formed web-search block
pub fn has_tag(text: &str) -> bool {
    TAG_RE.is_match(text)
}

/// Extract the query from the first web-search block: a JSON object with
/// a string `query` field, or a bare single-line query.
pub fn parse(text: &str) -> Option<String> {
    let body = TAG_RE.captures(text)?.get(1)?.as_str().trim();

    if body.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        return value
            .get("query")
            .and_then(|q| q.as_str())
            .map(|q| q.to_string());
    }

    if !body.is_empty() && !body.contains('\n') {
        return Some(body.to_string());
    }

    None
}

/// Remove the web-search block and the whitespace around it
pub fn strip(text: &str) -> String {
    STRIP_RE.replace_all(text, "").trim().to_string()
}

/// One search result from the external collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// External web-search collaborator
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> crate::error::Result<Vec<SearchHit>>;
}

/// Wrap results in the delimited block the model is re-prompted with
pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    let mut out = format!("[SEARCH RESULTS: {}]\n", query);
    if hits.is_empty() {
        out.push_str("No results.\n");
    }
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} - {}\n   {}\n",
            i + 1,
            hit.title,
            hit.url,
            hit.snippet
        ));
    }
    out.push_str("[/SEARCH RESULTS]");
    out
}

/// Wrap a search failure the same way file errors are wrapped
pub fn format_error(query: &str, error: &str) -> String {
    format!("[SEARCH ERROR: {}]\n{}\n[/SEARCH ERROR]", query, error)
}
