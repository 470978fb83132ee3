//! Per-session conversation state and the provider-ready projection
//!
//! Stored history is append-only. Everything the provider API needs
//! (role merging, the leading-user fix-up, summary injection, history
//! trimming) happens in the projection built by `messages_for_api` and
//! never mutates the stored entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use wyrm_ai::{ChatMessage, ChatRole};

use crate::budget::{TokenBudget, TokenUsage, estimate_tokens};
use crate::prompts;

/// Stored message count above which summarization kicks in
pub const SUMMARIZE_THRESHOLD: usize = 10;

/// Who authored a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One stored conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    /// Ids of retrieval chunks that informed this message, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_ids: Vec<String>,
}

/// A rolling summary covering the first `covers_up_to` stored messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub content: String,
    pub covers_up_to: usize,
}

/// Summarizes a conversation into a short recap. Failures are always
/// swallowed by callers; a failed summary just means no summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, entries: &[ChatEntry]) -> crate::error::Result<String>;
}

/// Provider-ready request pieces produced by `messages_for_api`
#[derive(Debug, Clone)]
pub struct ApiMessages {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub usage: TokenUsage,
}

/// Plain record form of a conversation, for the host's persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub saved_at: i64,
    pub entries: Vec<ChatEntry>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
    #[serde(default)]
    pub active_characters: Vec<String>,
}

/// Per-session conversation state
pub struct Conversation {
    entries: Vec<ChatEntry>,
    summaries: Vec<Summary>,
    active_characters: Vec<String>,
    last_token_estimate: u32,
    truncated: bool,
    budget: TokenBudget,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl Conversation {
    /// Create an empty conversation trimmed against the given budget
    pub fn new(budget: TokenBudget) -> Self {
        Self {
            entries: Vec::new(),
            summaries: Vec::new(),
            active_characters: Vec::new(),
            last_token_estimate: 0,
            truncated: false,
            budget,
            summarizer: None,
        }
    }

    /// Register the summarization callback
    pub fn set_summarizer(&mut self, summarizer: Arc<dyn Summarizer>) {
        self.summarizer = Some(summarizer);
    }

    /// Append a message to the stored history
    pub fn add_message(&mut self, role: Role, content: impl Into<String>, chunk_ids: Vec<String>) {
        self.entries.push(ChatEntry {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            chunk_ids,
        });
    }

    /// Get the raw stored history
    pub fn messages(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Number of stored messages
    pub fn message_count(&self) -> usize {
        self.entries.len()
    }

    /// Get the rolling summaries
    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    /// Replace the set of active character ids
    pub fn set_active_characters(&mut self, ids: Vec<String>) {
        self.active_characters = ids;
    }

    /// Get the active character ids
    pub fn active_characters(&self) -> &[String] {
        &self.active_characters
    }

    /// Drop all messages and summaries
    pub fn clear(&mut self) {
        self.entries.clear();
        self.summaries.clear();
        self.last_token_estimate = 0;
        self.truncated = false;
    }

    /// Heuristic token estimate recorded by the last `messages_for_api` call
    pub fn last_token_estimate(&self) -> u32 {
        self.last_token_estimate
    }

    /// Whether a budget ceiling has forced content to be dropped
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Serialize to a plain record
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            saved_at: chrono::Utc::now().timestamp_millis(),
            entries: self.entries.clone(),
            summaries: self.summaries.clone(),
            active_characters: self.active_characters.clone(),
        }
    }

    /// Rebuild a conversation from a plain record
    pub fn restore(snapshot: ConversationSnapshot, budget: TokenBudget) -> Self {
        Self {
            entries: snapshot.entries,
            summaries: snapshot.summaries,
            active_characters: snapshot.active_characters,
            last_token_estimate: 0,
            truncated: false,
            budget,
            summarizer: None,
        }
    }

    /// Build the provider-ready message list for the current game context.
    ///
    /// Never fails: a missing or failing summarizer simply omits the
    /// summary, and trimming degrades to dropping the oldest history.
    pub async fn messages_for_api(&mut self, current_context: &str) -> ApiMessages {
        let base_prompt = prompts::build_system_prompt(current_context);
        let system_prompt = if current_context.trim().is_empty() {
            base_prompt.clone()
        } else {
            format!("{}\n\nCurrent game state:\n{}", base_prompt, current_context)
        };

        let summary = self.maybe_summarize().await;

        // Trim oldest-first against the history ceiling; the projection is
        // trimmed, the stored entries are not.
        let mut start = 0usize;
        let ceiling = self.budget.conversation_history;
        while start + 1 < self.entries.len() {
            let estimate: u32 = self.entries[start..]
                .iter()
                .map(|e| estimate_tokens(&e.content))
                .sum();
            if estimate <= ceiling {
                break;
            }
            start += 1;
            self.truncated = true;
        }

        let mut messages = project_entries(&self.entries[start..]);

        if let Some(summary_text) = summary {
            if let Some(first) = messages.first_mut() {
                first.content = format!(
                    "Previously in this session:\n{}\n\n{}",
                    summary_text, first.content
                );
            }
        }

        let history_estimate: u32 = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        let usage = TokenUsage {
            system_prompt: estimate_tokens(&base_prompt),
            game_state: estimate_tokens(current_context),
            conversation_history: history_estimate,
            ..Default::default()
        };
        self.last_token_estimate = usage.total();

        ApiMessages {
            system_prompt,
            messages,
            usage,
        }
    }

    /// Produce a summary of the whole session, or nothing if no summarizer
    /// is registered, the history is empty, or the summarizer fails.
    pub async fn generate_session_summary(&self) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        if self.entries.is_empty() {
            return None;
        }
        match summarizer.summarize(&self.entries).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("session summary failed: {}", e);
                None
            }
        }
    }

    async fn maybe_summarize(&mut self) -> Option<String> {
        if self.entries.len() <= SUMMARIZE_THRESHOLD {
            return None;
        }
        let summarizer = Arc::clone(self.summarizer.as_ref()?);
        match summarizer.summarize(&self.entries).await {
            Ok(text) => {
                self.summaries.push(Summary {
                    content: text.clone(),
                    covers_up_to: self.entries.len(),
                });
                Some(text)
            }
            Err(e) => {
                tracing::warn!("summarization failed, continuing without: {}", e);
                None
            }
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(TokenBudget::default())
    }
}

/// Project stored entries into the alternating list the provider expects.
/// Runs of same-role messages merge into one entry; a history that starts
/// with an assistant message gets an empty leading user entry synthesized
/// so the assistant text is never dropped.
fn project_entries(entries: &[ChatEntry]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::new();

    for entry in entries {
        let role = match entry.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        match out.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&entry.content);
            }
            _ => out.push(ChatMessage {
                role,
                content: entry.content.clone(),
            }),
        }
    }

    if matches!(out.first(), Some(first) if first.role == ChatRole::Assistant) {
        out.insert(0, ChatMessage::user(""));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _entries: &[ChatEntry]) -> crate::error::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _entries: &[ChatEntry]) -> crate::error::Result<String> {
            Err(crate::error::Error::Summarization("boom".into()))
        }
    }

    fn filled(count: usize) -> Conversation {
        let mut conv = Conversation::default();
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            conv.add_message(role, format!("message {}", i), vec![]);
        }
        conv
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut conv = filled(4);
        conv.set_active_characters(vec!["kira".into()]);
        conv.clear();
        assert_eq!(conv.message_count(), 0);
        assert!(conv.messages().is_empty());
        // Active characters survive a history clear.
        assert_eq!(conv.active_characters(), ["kira".to_string()]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut conv = filled(5);
        conv.set_active_characters(vec!["kira".into(), "thorn".into()]);

        let record = conv.snapshot();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: ConversationSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Conversation::restore(parsed, TokenBudget::default());

        assert_eq!(restored.message_count(), 5);
        assert_eq!(restored.active_characters(), conv.active_characters());
    }

    #[tokio::test]
    async fn test_projection_starts_with_user_and_alternates() {
        let mut conv = filled(6);
        let api = conv.messages_for_api("").await;

        assert_eq!(api.messages[0].role, ChatRole::User);
        for pair in api.messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[tokio::test]
    async fn test_consecutive_same_role_merged_in_order() {
        let mut conv = Conversation::default();
        conv.add_message(Role::User, "first part", vec![]);
        conv.add_message(Role::User, "second part", vec![]);
        conv.add_message(Role::Assistant, "reply", vec![]);

        let api = conv.messages_for_api("").await;
        assert_eq!(api.messages.len(), 2);
        let merged = &api.messages[0].content;
        let first = merged.find("first part").unwrap();
        let second = merged.find("second part").unwrap();
        assert!(first < second);
        // Stored history is untouched by the projection.
        assert_eq!(conv.message_count(), 3);
    }

    #[tokio::test]
    async fn test_assistant_first_history_gets_synthetic_user() {
        let mut conv = Conversation::default();
        conv.add_message(Role::Assistant, "the cave mouth yawns", vec![]);
        conv.add_message(Role::User, "we enter", vec![]);

        let api = conv.messages_for_api("").await;
        assert_eq!(api.messages[0].role, ChatRole::User);
        assert!(api.messages[0].content.is_empty());
        assert!(api.messages[1].content.contains("cave mouth"));
    }

    #[tokio::test]
    async fn test_summarization_triggers_above_threshold() {
        let mut conv = filled(11);
        conv.set_summarizer(Arc::new(FixedSummarizer("the party did things")));

        let api = conv.messages_for_api("").await;
        assert!(api.messages[0].content.contains("the party did things"));
        assert_eq!(conv.summaries().len(), 1);
        assert_eq!(conv.summaries()[0].covers_up_to, 11);
    }

    #[tokio::test]
    async fn test_no_summary_at_threshold() {
        let mut conv = filled(10);
        conv.set_summarizer(Arc::new(FixedSummarizer("unused")));

        let api = conv.messages_for_api("").await;
        assert!(!api.messages[0].content.contains("unused"));
        assert!(conv.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_no_summary_without_summarizer() {
        let mut conv = filled(12);
        let api = conv.messages_for_api("").await;
        assert!(!api.messages[0].content.contains("Previously"));
    }

    #[tokio::test]
    async fn test_failing_summarizer_is_swallowed() {
        let mut conv = filled(12);
        conv.set_summarizer(Arc::new(FailingSummarizer));

        let api = conv.messages_for_api("").await;
        assert!(!api.messages[0].content.contains("Previously"));
        assert!(conv.summaries().is_empty());
        // And the projection is still usable.
        assert_eq!(api.messages[0].role, ChatRole::User);
    }

    #[tokio::test]
    async fn test_session_summary_requires_messages() {
        let mut conv = Conversation::default();
        conv.set_summarizer(Arc::new(FixedSummarizer("recap")));
        assert!(conv.generate_session_summary().await.is_none());

        conv.add_message(Role::User, "hello", vec![]);
        assert_eq!(
            conv.generate_session_summary().await.as_deref(),
            Some("recap")
        );
    }

    #[tokio::test]
    async fn test_session_summary_swallows_failure() {
        let mut conv = filled(3);
        conv.set_summarizer(Arc::new(FailingSummarizer));
        assert!(conv.generate_session_summary().await.is_none());
    }

    #[tokio::test]
    async fn test_history_trimmed_against_ceiling() {
        let budget = TokenBudget {
            conversation_history: 50,
            ..Default::default()
        };
        let mut conv = Conversation::new(budget);
        for i in 0..6 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            conv.add_message(role, "x".repeat(100), vec![]);
        }

        let api = conv.messages_for_api("").await;
        assert!(conv.was_truncated());
        assert!(api.usage.conversation_history <= 50);
        // Stored history keeps everything.
        assert_eq!(conv.message_count(), 6);
    }

    #[tokio::test]
    async fn test_token_estimate_recorded() {
        let mut conv = filled(2);
        assert_eq!(conv.last_token_estimate(), 0);
        let api = conv.messages_for_api("Initiative: 12").await;
        assert_eq!(conv.last_token_estimate(), api.usage.total());
        assert!(conv.last_token_estimate() > 0);
    }
}
