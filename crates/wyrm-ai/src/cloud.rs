//! Hosted OpenAI-compatible backend, the cloud alternative to the local server

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

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a hosted OpenAI-compatible endpoint with bearer auth
pub struct CloudClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudClient {
    /// Create a client for the given endpoint and API key
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Get the endpoint URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl ChatProvider for CloudClient {
    async fn is_running(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/v1/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::api(status, body));
        }
        let list: CloudModelList = resp.json().await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id,
                size: 0,
                modified_at: None,
            })
            .collect())
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
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", self.auth_header())
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
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", self.auth_header())
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
struct CloudModelList {
    #[serde(default)]
    data: Vec<CloudModelEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalized() {
        let client = CloudClient::new("https://api.example.com/", "key");
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_model_list_parses() {
        let json = r#"{"object":"list","data":[{"id":"gpt-4o-mini","object":"model"}]}"#;
        let list: CloudModelList = serde_json::from_str(json).unwrap();
        assert_eq!(list.data[0].id, "gpt-4o-mini");
    }
}
