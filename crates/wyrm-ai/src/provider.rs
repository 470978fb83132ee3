//! Provider abstraction over chat-capable inference servers

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    stream::ChatEventStream,
    types::{ChatMessage, ModelInfo},
};

/// A chat-capable inference backend (local server or hosted alternative).
///
/// The orchestration layer holds this as a trait object so tests can swap
/// in scripted implementations.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Probe whether the backend is reachable. Never errors; any failure
    /// reads as "not running".
    async fn is_running(&self) -> bool;

    /// List the models the backend can serve.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Stream a chat response. The returned stream yields `Delta` events
    /// as text arrives and exactly one terminal event, unless the caller's
    /// token fires first, in which case the stream ends silently.
    async fn stream_chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
        cancel: CancellationToken,
    ) -> Result<ChatEventStream>;

    /// Single-shot, non-streaming chat call. Errors on a non-success
    /// HTTP status. Used by the summarizer.
    async fn chat_once(&self, system: &str, messages: &[ChatMessage], model: &str)
    -> Result<String>;
}
