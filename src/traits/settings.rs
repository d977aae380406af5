//! Settings store trait

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// Key-value settings persisted on behalf of the UI.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn all(&self) -> Result<Map<String, Value>>;

    /// String value of `key`, ignoring non-string and blank entries.
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::trim).map(str::to_string))
            .filter(|s| !s.is_empty()))
    }
}
