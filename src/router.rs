//! Message router
//!
//! [`Relay`] owns the shared collaborators (Ollama client, cancellation
//! registry, settings, embedding generator, vector store) and dispatches
//! incoming work:
//!
//! - persistent channels go to a handler chosen by channel name
//!   ([`Relay::connect`])
//! - one-shot requests are answered through a [`Responder`]
//!   ([`Relay::handle_message`])

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;
use uuid::Uuid;

use crate::channel::{ChannelSender, MessageSink, RelayChannel, Responder};
use crate::config::{RelayConfig, normalize_base_url};
use crate::delivery;
use crate::error::{RelayError, Result};
use crate::handlers::{relay_chat_stream, relay_pull_stream, run_embedding_session};
use crate::ollama::{ChatRequest, OllamaClient, OllamaEmbeddingGenerator};
use crate::storage::{InMemoryVectorStore, MemorySettingsStore, keys};
use crate::traits::{EmbeddingGenerator, SearchFilter, SettingsStore, VectorStore};
use crate::utils::{CHAT_KEY, CancelHandle, CancellationRegistry, pull_key};

pub const CHAT_CHANNEL: &str = "chat";
pub const PULL_CHANNEL: &str = "model-pull";
pub const EMBED_CHANNEL: &str = "embed-batch";

const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Handler family selected by a channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Chat,
    Pull,
    EmbeddingBatch,
}

impl ChannelKind {
    /// `chat`, `model-pull[:*]` and `embed-batch[:*]`; anything else is unknown.
    pub fn from_name(name: &str) -> Option<Self> {
        let matches = |prefix: &str| {
            name == prefix
                || name
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(':'))
        };
        if name == CHAT_CHANNEL {
            Some(Self::Chat)
        } else if matches(PULL_CHANNEL) {
            Some(Self::Pull)
        } else if matches(EMBED_CHANNEL) {
            Some(Self::EmbeddingBatch)
        } else {
            None
        }
    }
}

/// A one-shot request: `{"type": "...", "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl RequestMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStart {
    #[serde(default)]
    model: Option<String>,
    messages: Vec<Value>,
    #[serde(default)]
    options: Option<Value>,
    #[serde(default)]
    format: Option<Value>,
    #[serde(default)]
    tools: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ModelPayload {
    model: String,
}

#[derive(Debug, Deserialize)]
struct CancelPullPayload {
    channel: String,
    model: String,
}

#[derive(Debug, Default, Deserialize)]
struct KeyPayload {
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPayload {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePayload {
    file_id: String,
}

fn is_cancel(message: &Value) -> bool {
    message.get("cancel").and_then(Value::as_bool) == Some(true)
}

fn parse_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| RelayError::InvalidMessage(format!("invalid {kind} payload: {e}")))
}

fn success(data: Value) -> Value {
    if data.is_null() {
        json!({ "success": true })
    } else {
        json!({ "success": true, "data": data })
    }
}

fn failure(error: &RelayError) -> Value {
    json!({ "success": false, "error": error.to_wire() })
}

/// Builder for [`Relay`].
#[derive(Default)]
pub struct RelayBuilder {
    config: Option<RelayConfig>,
    http_client: Option<reqwest::Client>,
    registry: Option<Arc<CancellationRegistry>>,
    settings: Option<Arc<dyn SettingsStore>>,
    embeddings: Option<Arc<dyn EmbeddingGenerator>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl RelayBuilder {
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Use a private registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<CancellationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replace the Ollama-backed embedding generator.
    pub fn embeddings(mut self, generator: Arc<dyn EmbeddingGenerator>) -> Self {
        self.embeddings = Some(generator);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Relay> {
        let config = self.config.unwrap_or_default();
        let client = match self.http_client {
            Some(http) => OllamaClient::new(config.base_url.clone(), http)
                .with_keep_alive(config.keep_alive.clone())
                .with_request_timeout(config.request_timeout),
            None => OllamaClient::from_config(&config)?,
        };
        Ok(Relay {
            inner: Arc::new(RelayInner {
                client,
                registry: self.registry.unwrap_or_else(CancellationRegistry::global),
                settings: self
                    .settings
                    .unwrap_or_else(|| Arc::new(MemorySettingsStore::new())),
                embeddings: self.embeddings,
                vector_store: self
                    .vector_store
                    .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new())),
                config,
            }),
        })
    }
}

struct RelayInner {
    config: RelayConfig,
    client: OllamaClient,
    registry: Arc<CancellationRegistry>,
    settings: Arc<dyn SettingsStore>,
    embeddings: Option<Arc<dyn EmbeddingGenerator>>,
    vector_store: Arc<dyn VectorStore>,
}

/// Cheaply cloneable handle to the relay.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.inner.config)
            .field("client", &self.inner.client)
            .field("live_operations", &self.inner.registry.len())
            .finish()
    }
}

impl Relay {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::default()
    }

    /// Relay with default collaborators for `config`.
    pub fn new(config: RelayConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.inner.settings
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.inner.vector_store
    }

    /// Abort every live operation. Returns how many were signalled.
    pub fn shutdown(&self) -> usize {
        let aborted = self.inner.registry.abort_all();
        tracing::info!(aborted, "relay shutting down");
        aborted
    }

    async fn setting(&self, key: &str) -> Option<String> {
        match self.inner.settings.get_string(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read setting; using configuration");
                None
            }
        }
    }

    /// Ollama client with settings overrides applied.
    pub async fn client(&self) -> Result<OllamaClient> {
        let mut client = match self.setting(keys::OLLAMA_URL).await {
            Some(url) => self.inner.client.with_base_url(&url)?,
            None => self.inner.client.clone(),
        };
        if let Some(keep_alive) = self.setting(keys::KEEP_ALIVE).await {
            client = client.with_keep_alive(Some(keep_alive));
        }
        Ok(client)
    }

    pub async fn chat_model(&self) -> String {
        self.setting(keys::CHAT_MODEL)
            .await
            .unwrap_or_else(|| self.inner.config.chat_model.clone())
    }

    pub async fn embedding_model(&self) -> String {
        self.setting(keys::EMBEDDING_MODEL)
            .await
            .unwrap_or_else(|| self.inner.config.embedding_model.clone())
    }

    async fn embedding_generator(&self) -> Result<Arc<dyn EmbeddingGenerator>> {
        if let Some(generator) = &self.inner.embeddings {
            return Ok(generator.clone());
        }
        let client = self.client().await?;
        Ok(Arc::new(OllamaEmbeddingGenerator::new(
            client,
            self.embedding_model().await,
        )))
    }

    /// Serve `channel` on a new task.
    ///
    /// The task runs inside a `channel` span carrying the channel name and a
    /// fresh connection id.
    pub fn connect(&self, channel: RelayChannel) -> JoinHandle<()> {
        let relay = self.clone();
        let span = tracing::debug_span!(
            "channel",
            name = %channel.name(),
            connection = %Uuid::new_v4()
        );
        tokio::spawn(async move { relay.serve_channel(channel).await }.instrument(span))
    }

    /// Serve `channel` until it disconnects.
    pub async fn serve_channel(&self, channel: RelayChannel) {
        let name = channel.name().to_string();
        match ChannelKind::from_name(&name) {
            Some(ChannelKind::Chat) => self.serve_chat(channel).await,
            Some(ChannelKind::Pull) => self.serve_pull(channel).await,
            Some(ChannelKind::EmbeddingBatch) => self.serve_embeddings(channel).await,
            None => {
                tracing::warn!(channel = %name, "unknown channel; disconnecting");
                channel.sender().disconnect();
            }
        }
    }

    async fn serve_chat(&self, channel: RelayChannel) {
        let (sender, mut receiver) = channel.into_parts();
        let mut live: Option<CancelHandle> = None;

        while let Some(message) = receiver.recv().await {
            if is_cancel(&message) {
                let aborted = self.inner.registry.abort(CHAT_KEY);
                tracing::debug!(aborted, "chat cancel requested");
                delivery::send(&sender, json!({ "done": true, "aborted": true }));
                continue;
            }
            match parse_payload::<ChatStart>("chat", message) {
                Ok(start) => live = Some(self.start_chat(start, sender.clone())),
                Err(e) => {
                    tracing::warn!(error = %e, "rejected chat message");
                    delivery::send(&sender, json!({ "error": e.to_wire() }));
                }
            }
        }

        if let Some(handle) = live
            && !handle.is_cancelled()
        {
            tracing::debug!("chat channel closed; aborting live stream");
            handle.cancel();
        }
    }

    fn start_chat(&self, start: ChatStart, sender: ChannelSender) -> CancelHandle {
        let (handle, aborted) = self.inner.registry.replace(CHAT_KEY);
        if aborted {
            tracing::debug!("aborted previous chat stream");
        }
        let relay = self.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move { relay.run_chat(start, sender, task_handle).await });
        handle
    }

    async fn run_chat(&self, start: ChatStart, sender: ChannelSender, handle: CancelHandle) {
        let registry = &self.inner.registry;
        let ChatStart {
            model,
            messages,
            options,
            format,
            tools,
        } = start;
        let model = match model.filter(|m| !m.trim().is_empty()) {
            Some(model) => model,
            None => self.chat_model().await,
        };

        let response = async {
            let client = self.client().await?;
            let request = ChatRequest {
                model: model.clone(),
                messages,
                stream: true,
                options,
                format,
                tools,
                keep_alive: client.keep_alive().map(str::to_string),
            };
            client.chat_stream(&request).await
        };
        let response = tokio::select! {
            biased;
            _ = handle.cancelled() => {
                registry.release(&handle);
                return;
            }
            response = response => response,
        };

        match response {
            Ok(response) => {
                relay_chat_stream(response.bytes_stream(), &sender, &handle, registry, &model)
                    .await;
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "chat request failed");
                delivery::send(&sender, json!({ "error": e.to_wire() }));
                registry.release(&handle);
            }
        }
    }

    async fn serve_pull(&self, channel: RelayChannel) {
        let name = channel.name().to_string();
        let (sender, mut receiver) = channel.into_parts();
        let mut live = LivePulls::default();
        let mut tasks: JoinSet<CancelHandle> = JoinSet::new();

        loop {
            let message = tokio::select! {
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok(handle) = finished {
                        live.finished(&handle);
                    }
                    continue;
                }
            };

            let model = match parse_payload::<ModelPayload>("model-pull", message.clone()) {
                Ok(payload) => payload.model,
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "rejected pull message");
                    delivery::send(&sender, json!({ "error": e.user_message() }));
                    continue;
                }
            };
            let key = pull_key(&name, &model);

            if is_cancel(&message) {
                let aborted = self.inner.registry.abort(&key);
                tracing::info!(key = %key, aborted, "pull cancel requested");
                live.forget(&key);
                delivery::send(&sender, json!({ "status": "cancelled" }));
                continue;
            }

            let (handle, restarted) = self.inner.registry.replace(key);
            if restarted {
                tracing::debug!(key = handle.key(), "restarting pull");
            }
            live.track(handle.clone());
            let relay = self.clone();
            let task_sender = sender.clone();
            tasks.spawn(async move {
                relay.run_pull(model, task_sender, handle.clone()).await;
                handle
            });
        }

        live.cancel_all();
        while tasks.join_next().await.is_some() {}
    }

    async fn run_pull(&self, model: String, sender: ChannelSender, handle: CancelHandle) {
        let registry = &self.inner.registry;
        let response = async { self.client().await?.pull_stream(&model).await };
        let response = tokio::select! {
            biased;
            _ = handle.cancelled() => {
                registry.release(&handle);
                return;
            }
            response = response => response,
        };

        match response {
            Ok(response) => {
                relay_pull_stream(response.bytes_stream(), &sender, &handle, registry, &model)
                    .await;
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "pull request failed");
                delivery::send(&sender, json!({ "error": e.user_message() }));
                registry.release(&handle);
            }
        }
    }

    async fn serve_embeddings(&self, channel: RelayChannel) {
        let generator = match self.embedding_generator().await {
            Ok(generator) => generator,
            Err(e) => {
                tracing::warn!(channel = channel.name(), error = %e, "embedding generator unavailable");
                let sender = channel.sender();
                delivery::send(
                    &sender,
                    json!({ "status": "error", "message": e.user_message(), "processed": 0, "total": 0 }),
                );
                sender.disconnect();
                return;
            }
        };
        let model = self.embedding_model().await;
        run_embedding_session(
            channel,
            generator,
            self.inner.vector_store.clone(),
            model,
        )
        .await;
    }

    /// Answer a one-shot request exactly once.
    pub async fn handle_message(&self, request: RequestMessage, responder: Responder) {
        let reply = self.request(request).await;
        delivery::respond(responder, reply);
    }

    /// Run a one-shot request and build its `{success, data | error}` reply.
    pub async fn request(&self, request: RequestMessage) -> Value {
        let kind = request.kind.clone();
        match self.dispatch(request).await {
            Ok(data) => success(data),
            Err(e) => {
                tracing::debug!(kind = %kind, error = %e, "request failed");
                failure(&e)
            }
        }
    }

    async fn dispatch(&self, request: RequestMessage) -> Result<Value> {
        let RequestMessage { kind, payload } = request;
        match kind.as_str() {
            "getModels" => self.client().await?.list_models().await,
            "getRunningModels" => self.client().await?.running_models().await,
            "getVersion" => self.client().await?.version().await,
            "showModel" => {
                let ModelPayload { model } = parse_payload(&kind, payload)?;
                self.client().await?.show_model(&model).await
            }
            "deleteModel" => {
                let ModelPayload { model } = parse_payload(&kind, payload)?;
                self.client().await?.delete_model(&model).await?;
                tracing::info!(model = %model, "model deleted");
                Ok(Value::Null)
            }
            "unloadModel" => {
                let ModelPayload { model } = parse_payload(&kind, payload)?;
                self.client().await?.unload_model(&model).await?;
                Ok(Value::Null)
            }
            "stopChat" => {
                let stopped = self.inner.registry.abort(CHAT_KEY);
                Ok(json!({ "stopped": stopped }))
            }
            "cancelPull" => {
                let CancelPullPayload { channel, model } = parse_payload(&kind, payload)?;
                let cancelled = self.inner.registry.abort(&pull_key(&channel, &model));
                Ok(json!({ "cancelled": cancelled }))
            }
            "getSettings" => {
                let KeyPayload { key } = if payload.is_null() {
                    KeyPayload::default()
                } else {
                    parse_payload(&kind, payload)?
                };
                match key {
                    Some(key) => Ok(self.inner.settings.get(&key).await?.unwrap_or(Value::Null)),
                    None => Ok(Value::Object(self.inner.settings.all().await?)),
                }
            }
            "updateSettings" => {
                self.update_settings(payload).await?;
                Ok(Value::Null)
            }
            "searchSimilar" => {
                let search: SearchPayload = parse_payload(&kind, payload)?;
                self.search_similar(search).await
            }
            "deleteEmbeddings" => {
                let FilePayload { file_id } = parse_payload(&kind, payload)?;
                let removed = self.inner.vector_store.delete_file(&file_id).await?;
                tracing::info!(file_id = %file_id, removed, "embeddings deleted");
                Ok(json!({ "removed": removed }))
            }
            other => Err(RelayError::InvalidMessage(format!(
                "unknown message type: {other}"
            ))),
        }
    }

    async fn update_settings(&self, payload: Value) -> Result<()> {
        let entries: Map<String, Value> = match payload {
            Value::Object(mut map) => {
                let single = map.len() == 2 && map.contains_key("value");
                match map.get("key").and_then(Value::as_str).map(str::to_string) {
                    Some(key) if single => {
                        let value = map.remove("value").unwrap_or(Value::Null);
                        Map::from_iter([(key, value)])
                    }
                    _ => map,
                }
            }
            _ => {
                return Err(RelayError::InvalidMessage(
                    "updateSettings expects {key, value} or an object".to_string(),
                ));
            }
        };

        for (key, value) in entries {
            if value.is_null() {
                self.inner.settings.remove(&key).await?;
                continue;
            }
            let value = match (key.as_str(), value.as_str()) {
                (keys::OLLAMA_URL, Some(url)) if !url.trim().is_empty() => {
                    Value::String(normalize_base_url(url)?)
                }
                _ => value,
            };
            tracing::debug!(key = %key, "setting updated");
            self.inner.settings.set(&key, value).await?;
        }
        Ok(())
    }

    async fn search_similar(&self, search: SearchPayload) -> Result<Value> {
        if search.query.trim().is_empty() {
            return Err(RelayError::InvalidMessage("query cannot be empty".to_string()));
        }
        let model = match search.model.filter(|m| !m.trim().is_empty()) {
            Some(model) => model,
            None => self.embedding_model().await,
        };
        let generator = self.embedding_generator().await?;
        let embedding = generator.generate(&search.query, Some(&model)).await?;
        let filter = search.file_id.map(|file_id| SearchFilter {
            file_id: Some(file_id),
        });
        let hits = self
            .inner
            .vector_store
            .search(
                &embedding,
                search.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                filter.as_ref(),
            )
            .await?;
        Ok(serde_json::to_value(hits)?)
    }
}

/// Pulls started on one channel that have not finished yet.
#[derive(Debug, Default)]
struct LivePulls {
    handles: HashMap<String, CancelHandle>,
}

impl LivePulls {
    fn track(&mut self, handle: CancelHandle) {
        self.handles.insert(handle.key().to_string(), handle);
    }

    fn forget(&mut self, key: &str) {
        self.handles.remove(key);
    }

    /// Drop a finished pull unless a newer pull has taken over its key.
    fn finished(&mut self, handle: &CancelHandle) {
        if self
            .handles
            .get(handle.key())
            .is_some_and(|live| live.same_operation(handle))
        {
            self.handles.remove(handle.key());
        }
    }

    fn cancel_all(&self) {
        for handle in self.handles.values().filter(|h| !h.is_cancelled()) {
            tracing::debug!(key = handle.key(), "pull channel closed; aborting");
            handle.cancel();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::traits::{ChunkMetadata, EmbeddingResult};
    use async_trait::async_trait;

    struct AxisEmbeddings;

    #[async_trait]
    impl EmbeddingGenerator for AxisEmbeddings {
        async fn generate_batch(
            &self,
            texts: &[String],
            _model: Option<&str>,
        ) -> Result<Vec<EmbeddingResult>> {
            Ok(texts
                .iter()
                .map(|t| EmbeddingResult::Success {
                    embedding: if t.contains("cat") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    },
                    model: "axis".into(),
                })
                .collect())
        }
    }

    fn relay() -> Relay {
        Relay::builder()
            .config(RelayConfig::default())
            .registry(Arc::new(CancellationRegistry::new()))
            .embeddings(Arc::new(AxisEmbeddings))
            .build()
            .unwrap()
    }

    #[test]
    fn channel_names_select_handlers() {
        assert_eq!(ChannelKind::from_name("chat"), Some(ChannelKind::Chat));
        assert_eq!(ChannelKind::from_name("model-pull"), Some(ChannelKind::Pull));
        assert_eq!(
            ChannelKind::from_name("model-pull:settings"),
            Some(ChannelKind::Pull)
        );
        assert_eq!(
            ChannelKind::from_name("embed-batch:doc-1"),
            Some(ChannelKind::EmbeddingBatch)
        );
        assert_eq!(ChannelKind::from_name("model-pulling"), None);
        assert_eq!(ChannelKind::from_name("chat:2"), None);
        assert_eq!(ChannelKind::from_name("telemetry"), None);
    }

    #[tokio::test]
    async fn unknown_channel_is_disconnected() {
        let relay = relay();
        let (local, mut remote) = channel("telemetry");
        relay.connect(local).await.unwrap();
        assert!(remote.is_disconnected());
        assert_eq!(remote.recv().await, None);
    }

    #[tokio::test]
    async fn unknown_request_type_is_rejected() {
        let reply = relay().request(RequestMessage::new("reboot", Value::Null)).await;
        assert_eq!(reply["success"], json!(false));
        assert_eq!(reply["error"]["status"], json!(400));
    }

    #[tokio::test]
    async fn handle_message_answers_responder() {
        let relay = relay();
        let (responder, rx) = Responder::new();
        relay
            .handle_message(RequestMessage::new("stopChat", Value::Null), responder)
            .await;
        assert_eq!(
            rx.await.unwrap(),
            json!({"success": true, "data": {"stopped": false}})
        );
    }

    #[tokio::test]
    async fn stop_chat_aborts_live_token() {
        let relay = relay();
        let handle = relay.registry().create(CHAT_KEY);
        let reply = relay.request(RequestMessage::new("stopChat", Value::Null)).await;
        assert_eq!(reply["data"]["stopped"], json!(true));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_pull_uses_channel_and_model() {
        let relay = relay();
        let handle = relay.registry().create(pull_key("model-pull:picker", "qwen2.5"));
        let reply = relay
            .request(RequestMessage::new(
                "cancelPull",
                json!({"channel": "model-pull:picker", "model": "qwen2.5"}),
            ))
            .await;
        assert_eq!(reply["data"]["cancelled"], json!(true));
        assert!(handle.is_cancelled());

        let again = relay
            .request(RequestMessage::new(
                "cancelPull",
                json!({"channel": "model-pull:picker", "model": "qwen2.5"}),
            ))
            .await;
        assert_eq!(again["data"]["cancelled"], json!(false));
    }

    #[tokio::test]
    async fn settings_round_trip_and_override_models() {
        let relay = relay();
        let reply = relay
            .request(RequestMessage::new(
                "updateSettings",
                json!({"key": "chatModel", "value": "qwen2.5"}),
            ))
            .await;
        assert_eq!(reply, json!({"success": true}));

        relay
            .request(RequestMessage::new(
                "updateSettings",
                json!({"ollamaUrl": "gpu-box:11434", "theme": "dark"}),
            ))
            .await;

        let one = relay
            .request(RequestMessage::new("getSettings", json!({"key": "chatModel"})))
            .await;
        assert_eq!(one["data"], json!("qwen2.5"));

        let all = relay.request(RequestMessage::new("getSettings", Value::Null)).await;
        assert_eq!(all["data"]["ollamaUrl"], json!("http://gpu-box:11434"));
        assert_eq!(all["data"]["theme"], json!("dark"));

        assert_eq!(relay.chat_model().await, "qwen2.5");
        assert_eq!(relay.client().await.unwrap().base_url(), "http://gpu-box:11434");
        assert_eq!(relay.embedding_model().await, "nomic-embed-text");
    }

    #[tokio::test]
    async fn invalid_payload_is_a_client_error() {
        let reply = relay()
            .request(RequestMessage::new("showModel", json!({"name": "x"})))
            .await;
        assert_eq!(reply["success"], json!(false));
        assert_eq!(reply["error"]["status"], json!(400));
    }

    #[tokio::test]
    async fn search_similar_embeds_query_and_filters() {
        let relay = relay();
        let store = relay.vector_store();
        let meta = |file: &str| ChunkMetadata {
            file_id: Some(file.into()),
            ..Default::default()
        };
        store.write("cats purr", &[1.0, 0.0], meta("f1")).await.unwrap();
        store.write("dogs bark", &[0.0, 1.0], meta("f1")).await.unwrap();
        store.write("cat facts", &[0.9, 0.1], meta("f2")).await.unwrap();

        let reply = relay
            .request(RequestMessage::new(
                "searchSimilar",
                json!({"query": "a cat", "limit": 1, "fileId": "f1"}),
            ))
            .await;
        assert_eq!(reply["success"], json!(true));
        let hits = reply["data"].as_array().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["content"], json!("cats purr"));
        assert_eq!(hits[0]["metadata"]["fileId"], json!("f1"));
    }

    #[tokio::test]
    async fn chat_cancel_is_acknowledged() {
        let relay = relay();
        let (local, mut remote) = channel("chat");
        let task = relay.connect(local);
        let handle = relay.registry().create(CHAT_KEY);

        remote.post_message(json!({"cancel": true})).unwrap();
        assert_eq!(
            remote.recv().await,
            Some(json!({"done": true, "aborted": true}))
        );
        assert!(handle.is_cancelled());
        drop(remote);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pull_cancel_is_acknowledged() {
        let relay = relay();
        let (local, mut remote) = channel("model-pull");
        let _task = relay.connect(local);
        let handle = relay.registry().create(pull_key("model-pull", "llama3.2"));

        remote
            .post_message(json!({"cancel": true, "model": "llama3.2"}))
            .unwrap();
        assert_eq!(remote.recv().await, Some(json!({"status": "cancelled"})));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn live_pulls_prune_only_the_current_operation() {
        let registry = CancellationRegistry::new();
        let mut live = LivePulls::default();
        let (old, _) = registry.replace(pull_key("model-pull", "a"));
        live.track(old.clone());
        let (new, _) = registry.replace(pull_key("model-pull", "a"));
        live.track(new.clone());
        let (other, _) = registry.replace(pull_key("model-pull", "b"));
        live.track(other.clone());

        live.finished(&old);
        assert_eq!(live.len(), 2);
        live.finished(&new);
        live.finished(&other);
        assert_eq!(live.len(), 0);
    }

    #[tokio::test]
    async fn new_chat_aborts_the_live_one() {
        let relay = Relay::builder()
            .config(
                RelayConfig::builder()
                    .base_url("http://127.0.0.1:9")
                    .build()
                    .unwrap(),
            )
            .registry(Arc::new(CancellationRegistry::new()))
            .build()
            .unwrap();
        let (local, _remote) = channel("chat");
        let (sender, _receiver) = local.into_parts();
        let first = relay.registry().create(CHAT_KEY);

        let start = ChatStart {
            model: None,
            messages: vec![json!({"role": "user", "content": "hi"})],
            options: None,
            format: None,
            tools: None,
        };
        let second = relay.start_chat(start, sender);
        assert!(first.is_cancelled());
        assert!(!second.same_operation(&first));
    }

    #[tokio::test]
    async fn delete_embeddings_removes_one_file() {
        let relay = relay();
        let store = relay.vector_store();
        let meta = |file: &str| ChunkMetadata {
            file_id: Some(file.to_string()),
            ..Default::default()
        };
        store.write("a", &[1.0, 0.0], meta("f1")).await.unwrap();
        store.write("b", &[0.0, 1.0], meta("f1")).await.unwrap();
        store.write("c", &[1.0, 1.0], meta("f2")).await.unwrap();

        let reply = relay
            .request(RequestMessage::new("deleteEmbeddings", json!({"fileId": "f1"})))
            .await;
        assert_eq!(reply, json!({"success": true, "data": {"removed": 2}}));

        let hits = store.search(&[1.0, 1.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_id.as_deref(), Some("f2"));

        let missing = relay
            .request(RequestMessage::new("deleteEmbeddings", json!({})))
            .await;
        assert_eq!(missing["error"]["status"], json!(400));
    }
}
