//! wyrm-agent: Game-master chat orchestration with in-band tool execution
//!
//! This crate owns the conversational core of the AI game master: session
//! conversations with rolling summarization, the token budget, tone
//! validation, the file and web-search tools requested through in-band
//! tags, and the stream orchestrator that ties them together under a
//! single cancellation token per chat invocation.

pub mod approval;
pub mod budget;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod summarize;
pub mod tone;
pub mod tools;

pub use approval::{ApprovalOutcome, ApprovalRegistry};
pub use budget::{TokenBudget, TokenUsage, estimate_tokens};
pub use config::ProviderConfig;
pub use conversation::{
    ChatEntry, Conversation, ConversationSnapshot, Role, Summarizer, Summary,
};
pub use error::{Error, Result};
pub use events::UiEvent;
pub use health::{ConnectionHealth, HealthStatus};
pub use orchestrator::{
    ChatRequest, Deps, FinalizedResponse, NullIndex, Orchestrator, PassthroughFinalizer,
    ResponseFinalizer, RetrievalIndex, RetrievedChunk, StreamCallbacks, StreamStatus,
};
pub use retry::RetryConfig;
pub use summarize::ProviderSummarizer;
pub use tools::{MAX_TOOL_DEPTH, SearchHit, SearchProvider, ToolRequest, parse_tool_request};
