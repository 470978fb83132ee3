//! In-band tool tags embedded in model output
//!
//! The model requests external actions by emitting delimited tags inside
//! its text. Parsing is pure and produces a small closed set of requests,
//! so the orchestrator's state machine never touches text-scanning
//! details.

pub mod file_read;
pub mod web_search;

pub use file_read::{FileReadError, MAX_FILE_SIZE};
pub use web_search::{SearchHit, SearchProvider};

/// Maximum tool recursion depth for one chat invocation, process-wide
pub const MAX_TOOL_DEPTH: u32 = 3;

/// A tool request parsed out of raw model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    /// Read a local file at this path
    FileRead(String),
    /// Search the web for this query (approval-gated)
    WebSearch(String),
}

/// Inspect raw model output for a tool request. A present but malformed
/// tag body reads as "no tool request" so the response falls through to
/// finalization. File reads win when both tag kinds appear.
pub fn parse_tool_request(text: &str) -> Option<ToolRequest> {
    if file_read::has_tag(text) {
        if let Some(path) = file_read::parse(text) {
            return Some(ToolRequest::FileRead(path));
        }
    }
    if web_search::has_tag(text) {
        if let Some(query) = web_search::parse(text) {
            return Some(ToolRequest::WebSearch(query));
        }
    }
    None
}
