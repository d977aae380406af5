//! Newline-delimited JSON frame decoding
//!
//! Ollama streams every response as one JSON object per line, but the transport
//! hands us the body in arbitrary fragments. [`DecodeState`] buffers raw bytes
//! up to the next newline, so a line (or a multi-byte character) split across
//! chunks is only decoded once it is complete.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;

/// Splits a byte buffer on `\n`, decoding each line as lossy UTF-8.
#[derive(Debug, Default, Clone)]
pub struct LineCodec {
    // Bytes before this index are known to contain no newline.
    next_index: usize,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        match buf[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let line = buf.split_to(self.next_index + offset + 1);
                self.next_index = 0;
                Ok(Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned()))
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

/// Carried state of one NDJSON stream.
#[derive(Debug, Default, Clone)]
pub struct DecodeState {
    buffer: BytesMut,
    codec: LineCodec,
}

impl DecodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text after the last newline seen so far.
    pub fn leftover_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// True when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feed one chunk and return the records of every line it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Ok(Some(line)) = self.codec.decode(&mut self.buffer) {
            records.extend(parse_frame(&line));
        }
        records
    }

    /// Parse whatever is left at end of stream as one final record.
    pub fn finish(&mut self) -> Option<Value> {
        let mut last = None;
        while let Ok(Some(line)) = self.codec.decode_eof(&mut self.buffer) {
            last = parse_frame(&line).or(last);
        }
        last
    }
}

/// Functional form of [`DecodeState::feed`]: `(chunk, state) -> (records, state)`.
pub fn decode(chunk: &[u8], mut state: DecodeState) -> (Vec<Value>, DecodeState) {
    let records = state.feed(chunk);
    (records, state)
}

/// Parse one candidate line. Blank lines yield nothing; malformed lines are logged and skipped.
pub fn parse_frame(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, line_len = line.len(), "skipping malformed NDJSON frame");
            None
        }
    }
}
