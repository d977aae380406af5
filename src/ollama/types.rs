//! Ollama API types
//!
//! Only the fields the relay consumes are modelled. Unknown fields are ignored
//! so newer Ollama versions stay parse-compatible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    /// Messages are forwarded untouched from the UI
    pub messages: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

/// One NDJSON frame of a chat stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatStreamChunk {
    #[serde(default)]
    pub message: Option<ChatChunkMessage>,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(flatten)]
    pub metrics: ChatMetricsRaw,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunkMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Timing and token counters reported on the final chat frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatMetricsRaw {
    pub total_duration: Option<u64>,
    pub load_duration: Option<u64>,
    pub prompt_eval_count: Option<u64>,
    pub prompt_eval_duration: Option<u64>,
    pub eval_count: Option<u64>,
    pub eval_duration: Option<u64>,
}

/// Metrics as relayed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl From<ChatMetricsRaw> for ChatMetrics {
    fn from(raw: ChatMetricsRaw) -> Self {
        Self {
            total_duration: raw.total_duration,
            load_duration: raw.load_duration,
            prompt_eval_count: raw.prompt_eval_count,
            prompt_eval_duration: raw.prompt_eval_duration,
            eval_count: raw.eval_count,
            eval_duration: raw.eval_duration,
        }
    }
}

/// One NDJSON frame of a pull stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub completed: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /api/embed`.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<&'a str>,
}

/// Response of `POST /api/embed`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_chunk_reads_content_and_metrics() {
        let chunk: ChatStreamChunk = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "total_duration": 5191566416u64,
            "eval_count": 298
        }))
        .unwrap();
        assert_eq!(chunk.done, Some(true));
        assert_eq!(chunk.metrics.total_duration, Some(5191566416));
        let metrics = ChatMetrics::from(chunk.metrics);
        assert_eq!(
            serde_json::to_value(metrics).unwrap()["evalCount"],
            json!(298)
        );
    }

    #[test]
    fn chat_request_omits_unset_fields() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            stream: true,
            options: None,
            format: None,
            tools: None,
            keep_alive: None,
        };
        assert_eq!(
            serde_json::to_value(req).unwrap(),
            json!({"model": "m", "messages": [{"role": "user", "content": "hi"}], "stream": true})
        );
    }
}
