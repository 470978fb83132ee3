//! Error types for wyrm-agent

use thiserror::Error;

/// Result type alias using wyrm-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during chat orchestration
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] wyrm_ai::Error),

    /// Summarization failed (swallowed by callers; the summary is omitted)
    #[error("summarization error: {0}")]
    Summarization(String),

    /// Web search failed
    #[error("search error: {0}")]
    Search(String),

    /// A generic orchestration error
    #[error("{0}")]
    Other(String),
}
