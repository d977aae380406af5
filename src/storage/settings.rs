//! Settings store implementations

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::error::{RelayError, Result};
use crate::traits::SettingsStore;

/// Setting keys the relay itself reads.
pub mod keys {
    /// Overrides the configured Ollama base URL
    pub const OLLAMA_URL: &str = "ollamaUrl";
    /// Overrides the default chat model
    pub const CHAT_MODEL: &str = "chatModel";
    /// Overrides the default embedding model
    pub const EMBEDDING_MODEL: &str = "embeddingModel";
    /// Overrides the configured keep-alive
    pub const KEEP_ALIVE: &str = "keepAlive";
}

/// Settings kept in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn all(&self) -> Result<Map<String, Value>> {
        Ok(self.values.read().await.clone())
    }
}

/// Settings persisted as one JSON object in a file.
///
/// The file is read lazily on first access and rewritten (via a temporary
/// file and rename) on every change.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => Ok(map),
                _ => Err(RelayError::StorageError(format!(
                    "settings file {} does not contain a JSON object",
                    self.path.display()
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(values)?;
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Run `f` on the loaded map, persisting afterwards when `write` is set.
    async fn with_values<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut Map<String, Value>) -> T,
    ) -> Result<T> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        let values = cache.get_or_insert_with(Map::new);
        let out = f(values);
        if write {
            self.persist(values).await?;
        }
        Ok(out)
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.with_values(false, |v| v.get(key).cloned()).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.with_values(true, |v| {
            v.insert(key.to_string(), value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_values(true, |v| {
            v.remove(key);
        })
        .await
    }

    async fn all(&self) -> Result<Map<String, Value>> {
        self.with_values(false, |v| v.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trips_values() {
        let store = MemorySettingsStore::new();
        store.set(keys::CHAT_MODEL, json!("qwen2.5")).await.unwrap();
        assert_eq!(
            store.get_string(keys::CHAT_MODEL).await.unwrap().as_deref(),
            Some("qwen2.5")
        );
        store.remove(keys::CHAT_MODEL).await.unwrap();
        assert!(store.get(keys::CHAT_MODEL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_strings_are_treated_as_unset() {
        let store = MemorySettingsStore::new();
        store.set(keys::OLLAMA_URL, json!("  ")).await.unwrap();
        assert!(store.get_string(keys::OLLAMA_URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = JsonFileSettingsStore::new(&path);
        assert!(store.all().await.unwrap().is_empty());
        store.set(keys::KEEP_ALIVE, json!("10m")).await.unwrap();
        store.set("theme", json!({"dark": true})).await.unwrap();

        let reopened = JsonFileSettingsStore::new(&path);
        assert_eq!(reopened.get(keys::KEEP_ALIVE).await.unwrap(), Some(json!("10m")));
        assert_eq!(reopened.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_store_rejects_non_object_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "[1,2,3]").await.unwrap();
        let store = JsonFileSettingsStore::new(&path);
        assert!(matches!(
            store.get("x").await.unwrap_err(),
            RelayError::StorageError(_)
        ));
    }
}
