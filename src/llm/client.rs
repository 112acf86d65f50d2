//! Completion service client.
//!
//! The client is a thin transport shim: it sends a conversation and returns
//! the raw reply text. It never inspects the content; the retry loop does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ServiceSection;
use crate::errors::ForecastError;
use crate::llm::types::ChatMessage;

/// Environment variable holding the completion service key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Abstraction over the completion service for testability.
/// Real implementation: `OpenAiClient`. Tests use scripted stubs.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `conversation` to `model` and return the reply text.
    async fn complete(
        &self,
        model: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, ForecastError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(service: &ServiceSection, api_key: impl Into<String>) -> Result<Self, ForecastError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs))
            .build()
            .map_err(|e| ForecastError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: chat_endpoint(&service.api_url),
            api_key: api_key.into(),
        })
    }

    /// Build a client with the key from `OPENAI_API_KEY`.
    pub fn from_env(service: &ServiceSection) -> Result<Self, ForecastError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ForecastError::Config(format!("{API_KEY_ENV} is not set")))?;
        Self::new(service, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, ForecastError> {
        let request = ChatRequest {
            model,
            messages: conversation,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ForecastError::transport(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastError::transport(format!(
                "completion service returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ForecastError::transport(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ForecastError::transport("completion response had no choices"))
    }
}

fn chat_endpoint(api_url: &str) -> String {
    format!("{}/chat/completions", api_url.trim_end_matches('/'))
}
