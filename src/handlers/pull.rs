//! Model pull relay
//!
//! Relays `/api/pull` progress frames. The terminal signal here is
//! `status: "success"`, relayed as `{"done": true}`.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::channel::MessageSink;
use crate::delivery;
use crate::error::RelayError;
use crate::ollama::PullProgress;
use crate::streaming::DecodeState;
use crate::utils::{CancelHandle, CancellationRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    Pulling,
    Done,
    Errored,
    Aborted,
    /// Body ended without success or error.
    Closed,
}

impl PullState {
    pub fn is_terminal(self) -> bool {
        self != PullState::Pulling
    }
}

/// Percentage for a `completed`/`total` pair, or `None` when `total` is not positive.
pub fn progress_percent(completed: f64, total: f64) -> Option<u64> {
    if total > 0.0 && completed.is_finite() {
        Some((completed / total * 100.0).round().max(0.0) as u64)
    } else {
        None
    }
}

/// Event relayed for one non-terminal pull frame.
fn status_event(progress: &PullProgress) -> Option<Value> {
    let status = progress.status.as_deref()?;
    if let (Some(completed), Some(total)) = (progress.completed, progress.total)
        && let Some(percent) = progress_percent(completed, total)
    {
        return Some(json!({
            "status": format!("Downloading: {percent}%"),
            "progress": percent,
        }));
    }
    Some(json!({ "status": status }))
}

#[derive(Debug)]
pub struct PullSession {
    model: String,
    state: PullState,
    decoder: DecodeState,
}

impl PullSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: PullState::Pulling,
            decoder: DecodeState::new(),
        }
    }

    pub fn state(&self) -> PullState {
        self.state
    }

    pub fn on_chunk<K: MessageSink + ?Sized>(&mut self, chunk: &[u8], sink: &K) -> PullState {
        if self.state.is_terminal() {
            return self.state;
        }
        for record in self.decoder.feed(chunk) {
            self.on_record(record, sink);
            if self.state.is_terminal() {
                break;
            }
        }
        self.state
    }

    pub fn on_end<K: MessageSink + ?Sized>(&mut self, sink: &K) -> PullState {
        if self.state.is_terminal() {
            return self.state;
        }
        if let Some(record) = self.decoder.finish() {
            self.on_record(record, sink);
        }
        if !self.state.is_terminal() {
            tracing::debug!(model = %self.model, "pull body ended without success");
            self.state = PullState::Closed;
        }
        self.state
    }

    pub fn on_error<K: MessageSink + ?Sized>(&mut self, error: &RelayError, sink: &K) -> PullState {
        if self.state.is_terminal() {
            return self.state;
        }
        tracing::warn!(model = %self.model, error = %error, "pull stream failed");
        delivery::send(sink, json!({ "error": error.user_message() }));
        self.state = PullState::Errored;
        self.state
    }

    pub fn abort(&mut self) -> PullState {
        if !self.state.is_terminal() {
            self.state = PullState::Aborted;
        }
        self.state
    }

    fn on_record<K: MessageSink + ?Sized>(&mut self, record: Value, sink: &K) {
        let progress: PullProgress = match serde_json::from_value(record) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "skipping unexpected pull record");
                return;
            }
        };

        if let Some(error) = progress.error {
            tracing::warn!(model = %self.model, error = %error, "upstream pull error");
            delivery::send(sink, json!({ "error": error }));
            self.state = PullState::Errored;
            return;
        }

        if progress.status.as_deref() == Some("success") {
            delivery::send(sink, json!({ "done": true }));
            self.state = PullState::Done;
            return;
        }

        if let Some(event) = status_event(&progress)
            && !delivery::send(sink, event)
        {
            self.state = PullState::Aborted;
        }
    }
}

/// Pump a pull body into `sink`. Releases the registry entry on every exit path.
pub async fn relay_pull_stream<B, E, K>(
    body: B,
    sink: &K,
    handle: &CancelHandle,
    registry: &CancellationRegistry,
    model: &str,
) -> PullState
where
    B: Stream<Item = Result<Bytes, E>>,
    E: Into<RelayError>,
    K: MessageSink + ?Sized,
{
    let mut body = std::pin::pin!(body);
    let mut session = PullSession::new(model);
    tracing::info!(channel = sink.channel_name(), model, key = handle.key(), "model pull started");

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
    tracing::info!(model, state = ?state, "model pull finished");
    state
}
