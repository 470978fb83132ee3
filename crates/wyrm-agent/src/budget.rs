//! Token budget table and heuristic estimation
//!
//! Ceilings are planning numbers, not tokenizer truth: estimates use the
//! chars/4 heuristic, which is close enough for trimming decisions.

use serde::{Deserialize, Serialize};

/// Per-category token ceilings for assembling a request context.
/// Read-only at runtime; trimming against these is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudget {
    pub system_prompt: u32,
    pub retrieved_chunks: u32,
    pub reference_data: u32,
    pub campaign_data: u32,
    pub creatures: u32,
    pub game_state: u32,
    pub memory: u32,
    pub conversation_history: u32,
    pub response_buffer: u32,
    pub file_content: u32,
    pub web_search_content: u32,
    pub total: u32,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            system_prompt: 4000,
            retrieved_chunks: 2000,
            reference_data: 2000,
            campaign_data: 1000,
            creatures: 500,
            game_state: 500,
            memory: 500,
            conversation_history: 2000,
            response_buffer: 1000,
            file_content: 500,
            web_search_content: 500,
            total: 14000,
        }
    }
}

/// Estimate token count for a piece of text (chars/4 heuristic)
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

/// Computed per-request usage, same shape as the budget, for display
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub system_prompt: u32,
    pub retrieved_chunks: u32,
    pub reference_data: u32,
    pub campaign_data: u32,
    pub creatures: u32,
    pub game_state: u32,
    pub memory: u32,
    pub conversation_history: u32,
    pub response_buffer: u32,
    pub file_content: u32,
    pub web_search_content: u32,
}

impl TokenUsage {
    /// Sum across all categories
    pub fn total(&self) -> u32 {
        self.system_prompt
            + self.retrieved_chunks
            + self.reference_data
            + self.campaign_data
            + self.creatures
            + self.game_state
            + self.memory
            + self.conversation_history
            + self.response_buffer
            + self.file_content
            + self.web_search_content
    }
}
