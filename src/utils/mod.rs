//! Utility modules for siumai-relay
//!
//! This module contains the small, reusable leaves the protocol handlers are built on.

pub mod cancel;

pub use cancel::{CHAT_KEY, CancelHandle, CancellationRegistry, pull_key};
