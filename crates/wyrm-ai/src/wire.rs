//! Wire types shared by the OpenAI-compatible chat endpoints

use async_stream::stream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    stream::{ChatEvent, ChatEventStream},
    types::{ChatMessage, ChatRole},
};

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

/// Build the wire message list: system prompt first, then the conversation.
pub(crate) fn build_messages(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(WireMessage {
            role: ChatRole::System.as_str(),
            content: system.to_string(),
        });
    }
    for msg in messages {
        out.push(WireMessage {
            role: msg.role.as_str(),
            content: msg.content.clone(),
        });
    }
    out
}

// Streaming response frames

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// Non-streaming response

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionMessage {
    #[serde(default)]
    pub content: String,
}

/// Decode `data: {...}` frames terminated by a `[DONE]` sentinel into chat
/// events. Malformed frames are skipped. If the caller's token fires, the
/// stream ends without a terminal event so no completion callback can run.
pub(crate) fn decode_sse(
    mut event_source: EventSource,
    cancel: CancellationToken,
) -> ChatEventStream {
    Box::pin(stream! {
        let mut accumulated = String::new();

        while let Some(event) = event_source.next().await {
            if cancel.is_cancelled() {
                return;
            }

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for choice in &chunk.choices {
                                if let Some(ref content) = choice.delta.content {
                                    accumulated.push_str(content);
                                    yield ChatEvent::Delta {
                                        text: content.clone(),
                                    };
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!("skipping malformed stream frame: {}", e);
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    yield ChatEvent::Error {
                        message: format!("stream error: {}", e),
                    };
                    return;
                }
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        yield ChatEvent::Done { text: accumulated };
    })
}
