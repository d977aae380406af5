//! Reference storage collaborators
//!
//! Implementations of [`crate::traits::SettingsStore`] and
//! [`crate::traits::VectorStore`] that need no external service.

pub mod settings;
pub mod vector;

pub use settings::{JsonFileSettingsStore, MemorySettingsStore, keys};
pub use vector::InMemoryVectorStore;
