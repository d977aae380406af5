//! Embedding batch sessions
//!
//! One session per `embed-batch` channel. The UI drives it with control
//! messages:
//!
//! - `{"type": "init", "metadata": {...}, "model"?: "..."}`
//! - `{"type": "batch", "chunks": [{"index": 0, "text": "..."}]}`
//! - `{"type": "done"}`
//! - `{"cancel": true}`
//!
//! Inbound messages are read by a separate task so a cancel (or a disconnect)
//! is seen while a batch is still being embedded; the batch checks the flag
//! before every vector-store write.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{MessageSink, RelayChannel};
use crate::delivery;
use crate::error::{RelayError, Result};
use crate::traits::{ChunkMetadata, EmbeddingGenerator, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `init`.
    Idle,
    Initialized,
    /// `done` or cancel handled; the channel is closed.
    Finished,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Command {
    Init {
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        model: Option<String>,
    },
    Batch {
        #[serde(default)]
        chunks: Vec<BatchChunk>,
    },
    Done,
}

#[derive(Debug, Clone, Deserialize)]
struct BatchChunk {
    #[serde(default)]
    index: Option<u64>,
    text: String,
}

fn is_cancel(message: &Value) -> bool {
    message.get("cancel").and_then(Value::as_bool) == Some(true)
}

/// Counters and metadata of one embedding session.
#[derive(Debug)]
pub struct EmbeddingBatchSession {
    state: SessionState,
    metadata: Map<String, Value>,
    model: Option<String>,
    total_chunks: u64,
    processed_chunks: u64,
    cancel: CancellationToken,
}

impl EmbeddingBatchSession {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: SessionState::Idle,
            metadata: Map::new(),
            model: None,
            total_chunks: 0,
            processed_chunks: 0,
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn processed(&self) -> u64 {
        self.processed_chunks
    }

    pub fn total(&self) -> u64 {
        self.total_chunks
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn counters(&self, status: &str) -> Value {
        json!({
            "status": status,
            "processed": self.processed_chunks,
            "total": self.total_chunks,
        })
    }

    fn report_error<K: MessageSink + ?Sized>(&self, sink: &K, message: &str) {
        let mut event = self.counters("error");
        event["message"] = json!(message);
        delivery::send(sink, event);
    }

    /// Handle one inbound control message.
    pub async fn handle_message<K: MessageSink + ?Sized>(
        &mut self,
        message: Value,
        sink: &K,
        generator: &dyn EmbeddingGenerator,
        store: &dyn VectorStore,
        default_model: &str,
    ) {
        if self.state == SessionState::Finished {
            tracing::debug!(channel = sink.channel_name(), "message after session end ignored");
            return;
        }

        if is_cancel(&message) {
            self.cancel.cancel();
            delivery::send(sink, self.counters("cancelled"));
            tracing::info!(
                channel = sink.channel_name(),
                processed = self.processed_chunks,
                total = self.total_chunks,
                "embedding session cancelled"
            );
            self.finish(sink);
            return;
        }

        if self.cancel.is_cancelled() {
            return;
        }

        let command = match serde_json::from_value::<Command>(message) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(channel = sink.channel_name(), error = %e, "invalid embedding message");
                self.report_error(sink, &format!("invalid message: {e}"));
                return;
            }
        };

        match command {
            Command::Init { metadata, model } => {
                self.metadata = metadata;
                self.model = model.filter(|m| !m.trim().is_empty());
                self.total_chunks = 0;
                self.processed_chunks = 0;
                self.state = SessionState::Initialized;
                tracing::debug!(channel = sink.channel_name(), model = ?self.model, "embedding session initialized");
                delivery::send(sink, json!({ "status": "initialized" }));
            }
            Command::Batch { chunks } => {
                if self.state != SessionState::Initialized {
                    self.report_error(sink, "session not initialized");
                    return;
                }
                if chunks.is_empty() {
                    return;
                }
                let model = self
                    .model
                    .clone()
                    .unwrap_or_else(|| default_model.to_string());
                match self.process_batch(chunks, &model, generator, store).await {
                    Ok(()) if self.cancel.is_cancelled() => {}
                    Ok(()) => {
                        if !delivery::send(sink, self.counters("progress")) {
                            self.cancel.cancel();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = sink.channel_name(), model = %model, error = %e, "embedding batch failed");
                        self.report_error(sink, &e.user_message());
                    }
                }
            }
            Command::Done => {
                delivery::send(sink, self.counters("done"));
                tracing::info!(
                    channel = sink.channel_name(),
                    processed = self.processed_chunks,
                    total = self.total_chunks,
                    "embedding session done"
                );
                self.finish(sink);
            }
        }
    }

    fn finish<K: MessageSink + ?Sized>(&mut self, sink: &K) {
        self.state = SessionState::Finished;
        sink.disconnect();
    }

    async fn process_batch(
        &mut self,
        chunks: Vec<BatchChunk>,
        model: &str,
        generator: &dyn EmbeddingGenerator,
        store: &dyn VectorStore,
    ) -> Result<()> {
        let first_index = self.total_chunks;
        self.total_chunks += chunks.len() as u64;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let results = generator.generate_batch(&texts, Some(model)).await?;
        if results.len() != chunks.len() {
            tracing::warn!(
                expected = chunks.len(),
                got = results.len(),
                "embedding batch returned a different number of results"
            );
        }

        for (position, chunk) in chunks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let index = chunk.index.unwrap_or(first_index + position as u64);
            match results.get(position).and_then(|r| r.embedding()) {
                Some(embedding) => {
                    let metadata = self.chunk_metadata(index);
                    if let Err(e) = store.write(&chunk.text, embedding, metadata).await {
                        tracing::warn!(chunk = index, error = %e, "failed to store chunk");
                    }
                }
                None => {
                    tracing::warn!(chunk = index, "no embedding for chunk; skipped");
                }
            }
            self.processed_chunks += 1;
        }
        Ok(())
    }

    fn chunk_metadata(&self, index: u64) -> ChunkMetadata {
        let mut extra = self.metadata.clone();
        let file_id = extra
            .remove("fileId")
            .and_then(|v| v.as_str().map(str::to_string));
        let title = extra
            .remove("title")
            .and_then(|v| v.as_str().map(str::to_string));
        ChunkMetadata {
            file_id,
            title,
            timestamp: Utc::now().timestamp_millis(),
            chunk_index: index,
            total_chunks: self.total_chunks,
            extra,
        }
    }
}

/// Drive an embedding session on `channel` until it finishes or disconnects.
///
/// Returns the final processed and total counters.
pub async fn run_embedding_session(
    channel: RelayChannel,
    generator: Arc<dyn EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
    default_model: String,
) -> (u64, u64) {
    let (sender, mut receiver) = channel.into_parts();
    let cancel = CancellationToken::new();
    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Value>();

    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if is_cancel(&message) {
                reader_cancel.cancel();
            }
            if queue_tx.send(message).is_err() {
                return;
            }
        }
        // No more messages: the channel is closed.
        reader_cancel.cancel();
    });

    let mut session = EmbeddingBatchSession::new(cancel);
    while let Some(message) = queue_rx.recv().await {
        session
            .handle_message(
                message,
                &sender,
                generator.as_ref(),
                store.as_ref(),
                &default_model,
            )
            .await;
        if session.state() == SessionState::Finished {
            break;
        }
    }

    sender.disconnect();
    if let Err(e) = reader.await {
        tracing::debug!(error = %RelayError::from(e), "embedding reader task ended abnormally");
    }
    tracing::debug!(
        channel = sender.channel_name(),
        processed = session.processed(),
        total = session.total(),
        "embedding session closed"
    );
    (session.processed(), session.total())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RemoteChannel, channel};
    use crate::storage::InMemoryVectorStore;
    use crate::traits::EmbeddingResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Returns a fixed embedding per text; texts starting with `bad` fail.
    #[derive(Default)]
    struct FakeGenerator {
        calls: Mutex<Vec<Vec<String>>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl EmbeddingGenerator for FakeGenerator {
        async fn generate_batch(
            &self,
            texts: &[String],
            model: Option<&str>,
        ) -> Result<Vec<EmbeddingResult>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with("bad") {
                        EmbeddingResult::Failure {
                            error: "boom".into(),
                        }
                    } else {
                        EmbeddingResult::Success {
                            embedding: vec![t.len() as f32, 1.0],
                            model: model.unwrap_or("default").to_string(),
                        }
                    }
                })
                .collect())
        }
    }

    async fn next(remote: &mut RemoteChannel) -> Option<Value> {
        tokio::time::timeout(std::time::Duration::from_secs(2), remote.recv())
            .await
            .ok()
            .flatten()
    }

    fn spawn_session(
        generator: Arc<FakeGenerator>,
        store: Arc<InMemoryVectorStore>,
    ) -> (RemoteChannel, tokio::task::JoinHandle<(u64, u64)>) {
        let (relay, remote) = channel("embed-batch");
        let task = tokio::spawn(run_embedding_session(
            relay,
            generator,
            store,
            "nomic-embed-text".to_string(),
        ));
        (remote, task)
    }

    #[tokio::test]
    async fn init_and_batch_write_each_chunk() {
        let store = Arc::new(InMemoryVectorStore::new());
        let generator = Arc::new(FakeGenerator::default());
        let (mut remote, task) = spawn_session(generator.clone(), store.clone());

        remote
            .post_message(json!({"type": "init", "metadata": {"fileId": "f1", "title": "Notes", "source": "upload"}}))
            .unwrap();
        assert_eq!(next(&mut remote).await, Some(json!({"status": "initialized"})));

        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "a"}, {"index": 1, "text": "b"}]}))
            .unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "progress", "processed": 2, "total": 2}))
        );
        assert_eq!(store.len().await, 2);

        remote.post_message(json!({"type": "done"})).unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "done", "processed": 2, "total": 2}))
        );
        assert_eq!(task.await.unwrap(), (2, 2));
        assert!(remote.is_disconnected());

        let hits = store.search(&[1.0, 1.0], 10, None).await.unwrap();
        let meta = &hits[0].metadata;
        assert_eq!(meta.file_id.as_deref(), Some("f1"));
        assert_eq!(meta.title.as_deref(), Some("Notes"));
        assert_eq!(meta.total_chunks, 2);
        assert_eq!(meta.extra.get("source"), Some(&json!("upload")));
        assert!(meta.timestamp > 0);
        assert_eq!(generator.calls.lock().unwrap()[0], vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failed_items_are_skipped_but_counted() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, _task) = spawn_session(Arc::new(FakeGenerator::default()), store.clone());

        remote.post_message(json!({"type": "init", "metadata": {}})).unwrap();
        next(&mut remote).await;
        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "bad"}, {"index": 1, "text": "ok"}]}))
            .unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "progress", "processed": 2, "total": 2}))
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn batch_before_init_is_an_error() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, _task) = spawn_session(Arc::new(FakeGenerator::default()), store.clone());

        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "a"}]}))
            .unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "error", "message": "session not initialized", "processed": 0, "total": 0}))
        );
        assert!(store.is_empty().await);
        assert!(!remote.is_disconnected());
    }

    #[tokio::test]
    async fn unknown_type_is_reported_without_disconnect() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, _task) = spawn_session(Arc::new(FakeGenerator::default()), store);

        remote.post_message(json!({"type": "rewind"})).unwrap();
        let event = next(&mut remote).await.unwrap();
        assert_eq!(event["status"], json!("error"));
        assert!(!remote.is_disconnected());
    }

    #[tokio::test]
    async fn empty_batch_is_ignored() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, _task) = spawn_session(Arc::new(FakeGenerator::default()), store);

        remote.post_message(json!({"type": "init"})).unwrap();
        next(&mut remote).await;
        remote.post_message(json!({"type": "batch", "chunks": []})).unwrap();
        remote.post_message(json!({"type": "done"})).unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "done", "processed": 0, "total": 0}))
        );
    }

    #[tokio::test]
    async fn cancel_during_batch_stops_writes() {
        let gate = Arc::new(Notify::new());
        let generator = Arc::new(FakeGenerator {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, task) = spawn_session(generator.clone(), store.clone());

        remote.post_message(json!({"type": "init"})).unwrap();
        next(&mut remote).await;
        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "a"}, {"index": 1, "text": "b"}]}))
            .unwrap();

        while generator.calls.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        remote.post_message(json!({"cancel": true})).unwrap();
        // Let the reader observe the cancel before the embedding call returns.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "cancelled", "processed": 0, "total": 2}))
        );
        assert_eq!(next(&mut remote).await, None);
        let (processed, total) = task.await.unwrap();
        assert!(processed <= total);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn remote_disconnect_ends_session() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, task) = spawn_session(Arc::new(FakeGenerator::default()), store.clone());

        remote.post_message(json!({"type": "init"})).unwrap();
        next(&mut remote).await;
        drop(remote);

        assert_eq!(task.await.unwrap(), (0, 0));
        assert!(store.is_empty().await);
    }

    async fn stored_chunks(store: &InMemoryVectorStore) -> Vec<(String, u64, u64)> {
        let mut chunks: Vec<_> = store
            .search(&[1.0, 1.0], 100, None)
            .await
            .unwrap()
            .into_iter()
            .map(|hit| (hit.content, hit.metadata.chunk_index, hit.metadata.total_chunks))
            .collect();
        chunks.sort_by_key(|(_, index, _)| *index);
        chunks
    }

    #[tokio::test]
    async fn totals_accumulate_across_batches() {
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, task) = spawn_session(Arc::new(FakeGenerator::default()), store.clone());

        remote.post_message(json!({"type": "init", "metadata": {"fileId": "f1"}})).unwrap();
        next(&mut remote).await;
        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "a"}, {"index": 1, "text": "b"}]}))
            .unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "progress", "processed": 2, "total": 2}))
        );
        // No index: falls back to the running position
        remote
            .post_message(json!({"type": "batch", "chunks": [{"text": "c"}]}))
            .unwrap();
        assert_eq!(
            next(&mut remote).await,
            Some(json!({"status": "progress", "processed": 3, "total": 3}))
        );
        remote.post_message(json!({"type": "done"})).unwrap();
        next(&mut remote).await;
        assert_eq!(task.await.unwrap(), (3, 3));

        assert_eq!(
            stored_chunks(&store).await,
            vec![
                ("a".to_string(), 0, 2),
                ("b".to_string(), 1, 2),
                ("c".to_string(), 2, 3),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_during_batch_stops_writes() {
        let gate = Arc::new(Notify::new());
        let generator = Arc::new(FakeGenerator {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let (mut remote, task) = spawn_session(generator.clone(), store.clone());

        remote.post_message(json!({"type": "init"})).unwrap();
        next(&mut remote).await;
        remote
            .post_message(json!({"type": "batch", "chunks": [{"index": 0, "text": "a"}, {"index": 1, "text": "b"}]}))
            .unwrap();
        while generator.calls.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(remote);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(task.await.unwrap(), (0, 2));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_session_ignores_init() {
        let store = InMemoryVectorStore::new();
        let generator = FakeGenerator::default();
        let (relay, mut remote) = channel("embed-batch");
        let sink = relay.sender();
        let token = CancellationToken::new();
        token.cancel();
        let mut session = EmbeddingBatchSession::new(token);

        session
            .handle_message(json!({"type": "init"}), &sink, &generator, &store, "m")
            .await;

        assert_eq!(session.state(), SessionState::Idle);
        drop(sink);
        drop(relay);
        assert_eq!(remote.recv().await, None);
    }

    #[tokio::test]
    async fn session_ignores_messages_after_done() {
        let store = InMemoryVectorStore::new();
        let generator = FakeGenerator::default();
        let (relay, mut remote) = channel("embed-batch");
        let sink = relay.sender();
        let mut session = EmbeddingBatchSession::new(CancellationToken::new());

        session
            .handle_message(json!({"type": "init"}), &sink, &generator, &store, "m")
            .await;
        session
            .handle_message(json!({"type": "done"}), &sink, &generator, &store, "m")
            .await;
        session
            .handle_message(
                json!({"type": "batch", "chunks": [{"text": "late"}]}),
                &sink,
                &generator,
                &store,
                "m",
            )
            .await;

        assert_eq!(session.state(), SessionState::Finished);
        assert!(generator.calls.lock().unwrap().is_empty());
        assert_eq!(remote.recv().await, Some(json!({"status": "initialized"})));
        assert_eq!(remote.recv().await.unwrap()["status"], json!("done"));
        assert_eq!(remote.recv().await, None);
    }
}
