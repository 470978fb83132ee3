//! Session summarization backed by the provider's single-shot chat call

use async_trait::async_trait;
use std::sync::Arc;
use wyrm_ai::ChatProvider;

use crate::conversation::{ChatEntry, Role, Summarizer};
use crate::error::{Error, Result};

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are the session scribe for a tabletop campaign. Condense play logs \
into a recap the narrator can lean on to keep continuity. Record what \
happened, who was involved, and any open threads. Plain prose, past tense.";

const SUMMARY_PROMPT: &str = "\
Summarize the session log below in a short paragraph. Keep character \
names, locations, unresolved goals, and promises the narrator made.

<session-log>
{conversation}
</session-log>";

/// Summarizer that calls the provider's non-streaming chat endpoint
pub struct ProviderSummarizer {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl ProviderSummarizer {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer {
    async fn summarize(&self, entries: &[ChatEntry]) -> Result<String> {
        let log = serialize_entries(entries);
        let prompt = SUMMARY_PROMPT.replace("{conversation}", &log);

        let text = self
            .provider
            .chat_once(
                SUMMARY_SYSTEM_PROMPT,
                &[wyrm_ai::ChatMessage::user(prompt)],
                &self.model,
            )
            .await
            .map_err(|e| Error::Summarization(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(Error::Summarization("empty summary".into()));
        }
        Ok(text)
    }
}

/// Serialize entries to labeled plain text so the model summarizes the log
/// instead of trying to continue it.
fn serialize_entries(entries: &[ChatEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let label = match entry.role {
            Role::User => "[Player]: ",
            Role::Assistant => "[Narrator]: ",
        };
        out.push_str(label);
        out.push_str(&entry.content);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_labels_roles() {
        let entries = vec![
            ChatEntry {
                role: Role::User,
                content: "I open the door".into(),
                timestamp: 0,
                chunk_ids: vec![],
            },
            ChatEntry {
                role: Role::Assistant,
                content: "It creaks".into(),
                timestamp: 0,
                chunk_ids: vec![],
            },
        ];
        let log = serialize_entries(&entries);
        assert!(log.contains("[Player]: I open the door"));
        assert!(log.contains("[Narrator]: It creaks"));
    }
}
