//! HTTP client for the local inference server

use async_trait::async_trait;
use reqwest_eventsource::EventSource;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    provider::ChatProvider,
    stream::ChatEventStream,
    types::{ChatMessage, ModelInfo},
    wire,
};

/// Default URL the local server listens on
pub const DEFAULT_URL: &str = "http://localhost:11434";

/// Liveness probe timeout; the probe should fail fast
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Request-level timeout for chat calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a locally hosted inference server
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client for the given server URL (trailing slashes stripped)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: normalize_url(&base_url.into()),
        }
    }

    /// Replace the server URL
    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.base_url = normalize_url(&url.into());
    }

    /// Get the server URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).timeout(PROBE_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::api(status, body));
        }
        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models)
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

#[async_trait]
impl ChatProvider for OllamaClient {
    async fn is_running(&self) -> bool {
        self.probe().await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.fetch_models().await
    }

    async fn stream_chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
        cancel: CancellationToken,
    ) -> Result<ChatEventStream> {
        let request = wire::ChatRequest {
            model: model.to_string(),
            messages: wire::build_messages(system, messages),
            stream: true,
        };

        let builder = self
            .client
            .post(self.chat_url())
            .timeout(REQUEST_TIMEOUT)
            .json(&request);

        let event_source = EventSource::new(builder)
            .map_err(|e| Error::Sse(format!("failed to open event source: {}", e)))?;

        Ok(wire::decode_sse(event_source, cancel))
    }

    async fn chat_once(
        &self,
        system: &str,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<String> {
        let request = wire::ChatRequest {
            model: model.to_string(),
            messages: wire::build_messages(system, messages),
            stream: false,
        };

        let resp = self
            .client
            .post(self.chat_url())
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::api(status, body));
        }

        let completion: wire::CompletionResponse = resp.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::UnexpectedResponse("no choices in response".into()))
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
