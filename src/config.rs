//! Relay configuration
//!
//! Static configuration is resolved once at startup (defaults, then
//! environment). Per-request values can still be overridden from the
//! settings store, see [`crate::storage::settings::keys`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RelayError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_MODEL: &str = "llama3.2";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

/// Configuration for the relay and its Ollama client.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Ollama base URL, without trailing slash
    pub base_url: String,
    /// Model used when a chat request names none
    pub chat_model: String,
    /// Model used for embeddings when none is given
    pub embedding_model: String,
    /// `keep_alive` forwarded to Ollama (e.g. "5m"); server default when `None`
    pub keep_alive: Option<String>,
    /// Timeout for non-streaming requests. Streams are never timed out.
    pub request_timeout: Option<Duration>,
    /// Listen address of the server adapter
    pub bind_addr: String,
    /// JSON file backing the settings store; in-memory settings when `None`
    pub settings_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            keep_alive: None,
            request_timeout: Some(Duration::from_secs(30)),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            settings_file: None,
        }
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Build a configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `OLLAMA_HOST`: Ollama address (scheme optional)
    /// - `SIUMAI_RELAY_CHAT_MODEL`: default chat model
    /// - `SIUMAI_RELAY_EMBEDDING_MODEL`: default embedding model
    /// - `SIUMAI_RELAY_KEEP_ALIVE`: keep-alive forwarded to Ollama
    /// - `SIUMAI_RELAY_TIMEOUT_SECS`: request timeout, `0` disables it
    /// - `SIUMAI_RELAY_BIND`: server adapter listen address
    /// - `SIUMAI_RELAY_SETTINGS_FILE`: JSON file for persisted settings
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(host) = lookup("OLLAMA_HOST") {
            builder = builder.base_url(host);
        }
        if let Some(model) = lookup("SIUMAI_RELAY_CHAT_MODEL") {
            builder = builder.chat_model(model);
        }
        if let Some(model) = lookup("SIUMAI_RELAY_EMBEDDING_MODEL") {
            builder = builder.embedding_model(model);
        }
        if let Some(keep_alive) = lookup("SIUMAI_RELAY_KEEP_ALIVE") {
            builder = builder.keep_alive(keep_alive);
        }
        if let Some(secs) = lookup("SIUMAI_RELAY_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                RelayError::ConfigurationError(format!(
                    "SIUMAI_RELAY_TIMEOUT_SECS must be a whole number of seconds, got '{secs}'"
                ))
            })?;
            builder = builder.request_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(addr) = lookup("SIUMAI_RELAY_BIND") {
            builder = builder.bind_addr(addr);
        }
        if let Some(path) = lookup("SIUMAI_RELAY_SETTINGS_FILE").filter(|p| !p.trim().is_empty()) {
            builder = builder.settings_file(path);
        }
        builder.build()
    }
}

/// Builder for [`RelayConfig`]
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    base_url: Option<String>,
    chat_model: Option<String>,
    embedding_model: Option<String>,
    keep_alive: Option<String>,
    request_timeout: Option<Option<Duration>>,
    bind_addr: Option<String>,
    settings_file: Option<PathBuf>,
}

impl RelayConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    pub fn settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_file = Some(path.into());
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RelayConfig> {
        let defaults = RelayConfig::default();
        let base_url = match self.base_url {
            Some(url) => normalize_base_url(&url)?,
            None => defaults.base_url,
        };
        let chat_model = non_empty("chat model", self.chat_model)?.unwrap_or(defaults.chat_model);
        let embedding_model = non_empty("embedding model", self.embedding_model)?
            .unwrap_or(defaults.embedding_model);
        Ok(RelayConfig {
            base_url,
            chat_model,
            embedding_model,
            keep_alive: self.keep_alive.filter(|k| !k.trim().is_empty()),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            bind_addr: self.bind_addr.unwrap_or(defaults.bind_addr),
            settings_file: self.settings_file,
        })
    }
}

fn non_empty(what: &str, value: Option<String>) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().is_empty() => Err(RelayError::ConfigurationError(format!(
            "{what} cannot be empty"
        ))),
        other => Ok(other.map(|v| v.trim().to_string())),
    }
}

/// Add a missing `http://` scheme and strip trailing slashes.
pub fn normalize_base_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(RelayError::ConfigurationError(
            "Base URL cannot be empty".to_string(),
        ));
    }
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    };
    Ok(with_scheme.trim_end_matches('/').to_string())
}
