//! Cancellation utilities
//!
//! Provides the process-wide registry of cancellation tokens used by every
//! streaming handler. Each in-flight operation is identified by a composite
//! string key (for example `model-pull:llama3.2`), and the registry tracks at
//! most one live token per key.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Key of the single live chat stream.
pub const CHAT_KEY: &str = "chat";

/// Cancellation key for a pull running on `channel` for `model`.
pub fn pull_key(channel: &str, model: &str) -> String {
    format!("{channel}:{model}")
}

static GLOBAL_REGISTRY: Lazy<Arc<CancellationRegistry>> =
    Lazy::new(|| Arc::new(CancellationRegistry::new()));

/// A handle returned by [`CancellationRegistry::create`].
///
/// Handlers observe the token through this handle. The generation lets the
/// owner release its own entry without touching a newer entry that replaced it.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    key: Arc<str>,
    generation: u64,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when both handles came from the same `create`/`replace` call.
    pub fn same_operation(&self, other: &CancelHandle) -> bool {
        self.generation == other.generation && self.key == other.key
    }

    /// Request cancellation directly on this token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// Map of cancellation tokens keyed by composite strings.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> Arc<CancellationRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh token for `key`.
    ///
    /// Any previous entry stops being tracked but is not signalled; call
    /// [`abort`](Self::abort) first to stop the operation it belongs to.
    pub fn create(&self, key: impl Into<String>) -> CancelHandle {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let replaced = self.entries().insert(
            key.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if replaced.is_some() {
            tracing::debug!(key = %key, "replaced cancellation token");
        }
        CancelHandle {
            key: Arc::from(key),
            generation,
            token,
        }
    }

    /// Signal any live token for `key` and register a fresh one, under one lock.
    ///
    /// Returns the new handle and whether a previous operation was aborted.
    pub fn replace(&self, key: impl Into<String>) -> (CancelHandle, bool) {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.entries().insert(
            key.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        let aborted = match previous {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!(key = %key, "aborted previous operation");
                true
            }
            None => false,
        };
        let handle = CancelHandle {
            key: Arc::from(key),
            generation,
            token,
        };
        (handle, aborted)
    }

    /// Signal the token for `key` and remove it. Returns whether an entry existed.
    pub fn abort(&self, key: &str) -> bool {
        let removed = self.entries().remove(key);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!(key = %key, "aborted operation");
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `key` without signalling it.
    pub fn clear(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Remove the entry only if it still belongs to `handle`.
    pub fn release(&self, handle: &CancelHandle) -> bool {
        let mut entries = self.entries();
        match entries.get(handle.key()) {
            Some(entry) if entry.generation == handle.generation => {
                entries.remove(handle.key());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<CancellationToken> {
        self.entries().get(key).map(|e| e.token.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Signal and remove every entry. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
