//! Streaming Module
//!
//! Frame decoding shared by the chat and pull handlers:
//! - NDJSON line framing with carried leftover state
//! - raw bytes buffered up to each newline, so UTF-8 split across chunks stays intact

mod ndjson;

pub use ndjson::*;
