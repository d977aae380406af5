//! Channel handlers
//!
//! - [`chat`]: relays `/api/chat` streams
//! - [`pull`]: relays `/api/pull` progress
//! - [`embedding_batch`]: embeds and stores document chunks

pub mod chat;
pub mod embedding_batch;
pub mod pull;

pub use chat::{ChatSession, ChatState, relay_chat_stream};
pub use embedding_batch::{EmbeddingBatchSession, SessionState, run_embedding_session};
pub use pull::{PullSession, PullState, progress_percent, relay_pull_stream};
