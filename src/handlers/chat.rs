//! Chat stream relay
//!
//! Turns an Ollama `/api/chat` NDJSON body into channel events:
//!
//! - `{"delta": "..."}` for each content fragment
//! - `{"done": true, "content": "...", "metrics": {...}}` on the done record
//! - `{"error": {"status": 500, "message": "..."}}` on an error record
//!
//! Aborts are answered by whoever cancelled the stream (`{"done": true,
//! "aborted": true}`), never by the stream itself.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::channel::MessageSink;
use crate::delivery;
use crate::error::{RelayError, UPSTREAM_ERROR_STATUS};
use crate::ollama::{ChatMetrics, ChatStreamChunk};
use crate::streaming::DecodeState;
use crate::utils::{CancelHandle, CancellationRegistry};

/// Lifecycle of one chat stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Streaming,
    /// Done record relayed.
    Done,
    /// Error relayed (upstream record or body failure).
    Errored,
    /// Cancelled, or the channel went away.
    Aborted,
    /// Body ended without a done record.
    Closed,
}

impl ChatState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChatState::Idle | ChatState::Streaming)
    }
}

/// Per-stream chat state: decoder, accumulated reply, lifecycle.
#[derive(Debug)]
pub struct ChatSession {
    model: String,
    state: ChatState,
    content: String,
    decoder: DecodeState,
}

impl ChatSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: ChatState::Idle,
            content: String::new(),
            decoder: DecodeState::new(),
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Text accumulated from deltas so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Decode one body chunk and relay its records.
    pub fn on_chunk<K: MessageSink + ?Sized>(&mut self, chunk: &[u8], sink: &K) -> ChatState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = ChatState::Streaming;
        for record in self.decoder.feed(chunk) {
            self.on_record(record, sink);
            if self.state.is_terminal() {
                break;
            }
        }
        self.state
    }

    /// Natural end of body. A done record left in the decoder is still relayed.
    pub fn on_end<K: MessageSink + ?Sized>(&mut self, sink: &K) -> ChatState {
        if self.state.is_terminal() {
            return self.state;
        }
        if let Some(record) = self.decoder.finish()
            && record.get("done").and_then(Value::as_bool) == Some(true)
        {
            self.on_record(record, sink);
        }
        if !self.state.is_terminal() {
            tracing::debug!(model = %self.model, "chat body ended without a done record");
            self.state = ChatState::Closed;
        }
        self.state
    }

    /// Relay a transport or HTTP failure as the terminal error event.
    pub fn on_error<K: MessageSink + ?Sized>(&mut self, error: &RelayError, sink: &K) -> ChatState {
        if self.state.is_terminal() {
            return self.state;
        }
        tracing::warn!(model = %self.model, error = %error, "chat stream failed");
        delivery::send(sink, json!({ "error": error.to_wire() }));
        self.state = ChatState::Errored;
        self.state
    }

    pub fn abort(&mut self) -> ChatState {
        if !self.state.is_terminal() {
            self.state = ChatState::Aborted;
        }
        self.state
    }

    fn on_record<K: MessageSink + ?Sized>(&mut self, record: Value, sink: &K) {
        if let Some(error) = record.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            tracing::warn!(model = %self.model, error = %message, "upstream chat error");
            delivery::send(
                sink,
                json!({ "error": { "status": UPSTREAM_ERROR_STATUS, "message": message } }),
            );
            self.state = ChatState::Errored;
            return;
        }

        let chunk: ChatStreamChunk = match serde_json::from_value(record) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "skipping unexpected chat record");
                return;
            }
        };

        if let Some(delta) = chunk
            .message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .filter(|c| !c.is_empty())
        {
            self.content.push_str(delta);
            if !delivery::send(sink, json!({ "delta": delta })) {
                self.state = ChatState::Aborted;
                return;
            }
        }

        if chunk.done == Some(true) {
            let metrics = ChatMetrics::from(chunk.metrics);
            delivery::send(
                sink,
                json!({ "done": true, "content": self.content, "metrics": metrics }),
            );
            self.state = ChatState::Done;
        }
    }
}

/// Pump `body` into `sink` until done, error, end of body, or cancellation.
///
/// The registry entry behind `handle` is released on every exit path.
pub async fn relay_chat_stream<B, E, K>(
    body: B,
    sink: &K,
    handle: &CancelHandle,
    registry: &CancellationRegistry,
    model: &str,
) -> ChatState
where
    B: Stream<Item = Result<Bytes, E>>,
    E: Into<RelayError>,
    K: MessageSink + ?Sized,
{
    let mut body = std::pin::pin!(body);
    let mut session = ChatSession::new(model);
    tracing::debug!(channel = sink.channel_name(), model, key = handle.key(), "chat stream started");

    let state = loop {
        if handle.is_cancelled() {
            break session.abort();
        }
        let next = tokio::select! {
            biased;
            _ = handle.cancelled() => None,
            next = body.next() => Some(next),
        };
        match next {
            None => break session.abort(),
            Some(None) => break session.on_end(sink),
            Some(Some(Ok(chunk))) => {
                let state = session.on_chunk(&chunk, sink);
                if state.is_terminal() {
                    break state;
                }
            }
            Some(Some(Err(e))) => break session.on_error(&e.into(), sink),
        }
    };

    registry.release(handle);
    tracing::debug!(model, state = ?state, chars = session.content().len(), "chat stream finished");
    state
}
