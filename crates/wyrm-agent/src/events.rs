//! Host-to-UI push channel events
//!
//! Fire-and-forget notifications for every connected UI surface; a send
//! with no subscribers is fine.

use serde::{Deserialize, Serialize};

/// Out-of-band events pushed to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// A web search is waiting on operator approval
    WebSearchApprovalRequest { stream_id: String, query: String },

    /// A chat stream started
    StreamStarted {
        stream_id: String,
        session_id: String,
    },

    /// A chat stream finished, failed, or was cancelled
    StreamEnded { stream_id: String },
}
