//! Ollama Client Implementation
//!
//! Thin reqwest wrapper over the Ollama REST API. Streaming endpoints return the
//! raw `reqwest::Response` so the protocol handlers can drive the body
//! themselves; everything else is decoded here.

use serde_json::{Value, json};
use std::time::Duration;

use super::types::{ChatRequest, EmbedRequest, EmbedResponse};
use crate::config::{RelayConfig, normalize_base_url};
use crate::error::{RelayError, Result};

/// Ollama Client
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    http_client: reqwest::Client,
    request_timeout: Option<Duration>,
    keep_alive: Option<String>,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            request_timeout: None,
            keep_alive: None,
        }
    }

    /// Build a client from relay configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        // No client-wide timeout: it would cut long-running streams.
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::ConfigurationError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http_client,
            request_timeout: config.request_timeout,
            keep_alive: config.keep_alive.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn keep_alive(&self) -> Option<&str> {
        self.keep_alive.as_deref()
    }

    /// Same client pointed at another base URL (settings override).
    pub fn with_base_url(&self, base_url: &str) -> Result<Self> {
        let mut client = self.clone();
        client.base_url = normalize_base_url(base_url)?;
        Ok(client)
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Timeout for non-streaming requests.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn with_timeout(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(RelayError::from)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(classify_http_error(
            status.as_u16(),
            &text,
            status.canonical_reason(),
        ))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let request = self.with_timeout(self.http_client.get(self.url(path)));
        let response = self.send(request).await?;
        response.json::<Value>().await.map_err(|e| {
            RelayError::ParseError(format!("Failed to parse {path} response: {e}"))
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let request = self.with_timeout(self.http_client.post(self.url(path)).json(body));
        let response = self.send(request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| RelayError::HttpError(format!("Failed to read body: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RelayError::ParseError(format!("Failed to parse {path} response: {e}")))
    }

    /// Start a streaming chat. The returned response body is NDJSON.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        validate_model_name(&request.model)?;
        let request = self.http_client.post(self.url("api/chat")).json(request);
        self.send(request).await
    }

    /// Start a streaming pull of `model`. The returned response body is NDJSON.
    pub async fn pull_stream(&self, model: &str) -> Result<reqwest::Response> {
        validate_model_name(model)?;
        let body = json!({ "model": model, "stream": true });
        let request = self.http_client.post(self.url("api/pull")).json(&body);
        self.send(request).await
    }

    /// Embed several inputs in one call.
    pub async fn embed(&self, model: &str, input: &[String]) -> Result<EmbedResponse> {
        validate_model_name(model)?;
        let body = EmbedRequest {
            model,
            input,
            keep_alive: self.keep_alive.as_deref(),
        };
        let request = self.with_timeout(self.http_client.post(self.url("api/embed")).json(&body));
        let response = self.send(request).await?;
        response
            .json::<EmbedResponse>()
            .await
            .map_err(|e| RelayError::ParseError(format!("Failed to parse embed response: {e}")))
    }

    /// `GET /api/tags`
    pub async fn list_models(&self) -> Result<Value> {
        self.get_json("api/tags").await
    }

    /// `GET /api/ps`
    pub async fn running_models(&self) -> Result<Value> {
        self.get_json("api/ps").await
    }

    /// `GET /api/version`
    pub async fn version(&self) -> Result<Value> {
        self.get_json("api/version").await
    }

    /// `POST /api/show`
    pub async fn show_model(&self, model: &str) -> Result<Value> {
        validate_model_name(model)?;
        self.post_json("api/show", &json!({ "model": model })).await
    }

    /// `DELETE /api/delete`
    pub async fn delete_model(&self, model: &str) -> Result<()> {
        validate_model_name(model)?;
        let request = self.with_timeout(
            self.http_client
                .delete(self.url("api/delete"))
                .json(&json!({ "model": model })),
        );
        self.send(request).await?;
        Ok(())
    }

    /// Ask Ollama to evict `model` from memory now.
    pub async fn unload_model(&self, model: &str) -> Result<()> {
        validate_model_name(model)?;
        self.post_json("api/generate", &json!({ "model": model, "keep_alive": 0 }))
            .await?;
        Ok(())
    }
}

/// Turn a non-success response into a `RelayError::ApiError`.
///
/// Ollama reports failures as `{"error": "..."}`; other bodies are used verbatim.
pub fn classify_http_error(status: u16, body_text: &str, fallback: Option<&str>) -> RelayError {
    let details = serde_json::from_str::<Value>(body_text).ok();
    let message = details
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .or_else(|| {
            let trimmed = body_text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}"));
    RelayError::ApiError {
        code: status,
        message,
        details,
    }
}

/// Reject model names Ollama would refuse anyway.
pub fn validate_model_name(model: &str) -> Result<()> {
    if model.is_empty() {
        return Err(RelayError::ConfigurationError(
            "Model name cannot be empty".to_string(),
        ));
    }

    if model.contains(' ') || model.contains('\n') || model.contains('\t') {
        return Err(RelayError::ConfigurationError(
            "Model name contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
