//! Streaming helpers shared by the backend families
//!
//! Ollama streams newline-delimited JSON; OpenAI streams server-sent events.
//! Both are read line by line through [`LineBuffer`] and folded into one
//! canonical reply by [`StreamAccumulator`].

use crate::types::CanonicalResponse;
use tokio::sync::mpsc;

/// Splits a byte stream into trimmed, non-empty lines
///
/// Bytes are buffered until a newline arrives, so multi-byte UTF-8
/// sequences split across network chunks are decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Payload of an SSE `data:` line
///
/// Returns `None` for comments, other fields, and blank payloads.
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim();
    (!data.is_empty()).then_some(data)
}

/// SSE end-of-stream sentinel
pub const SSE_DONE: &str = "[DONE]";

/// Folds streamed deltas into one reply
///
/// Each non-empty delta is forwarded to the optional sink as an incremental
/// chunk with `done = false`. [`finish`](Self::finish) emits exactly one
/// terminal chunk with `done = true` carrying the full text.
#[derive(Debug)]
pub struct StreamAccumulator {
    model: String,
    content: String,
    chunks: usize,
    sink: Option<mpsc::Sender<CanonicalResponse>>,
}

impl StreamAccumulator {
    pub fn new(model: impl Into<String>, sink: Option<mpsc::Sender<CanonicalResponse>>) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            chunks: 0,
            sink,
        }
    }

    /// Record the model name reported by the stream itself
    pub fn set_model(&mut self, model: &str) {
        if !model.is_empty() && self.model != model {
            self.model = model.to_string();
        }
    }

    pub async fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.content.push_str(delta);
        self.chunks += 1;

        if let Some(sink) = &self.sink {
            let chunk = CanonicalResponse::assistant(delta, self.model.clone(), false);
            if sink.send(chunk).await.is_err() {
                tracing::debug!(model = %self.model, "Stream receiver dropped, continuing without sink");
                self.sink = None;
            }
        }
    }

    /// Number of incremental chunks seen so far
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub async fn finish(self) -> CanonicalResponse {
        let terminal = CanonicalResponse::assistant(self.content, self.model, true);
        if let Some(sink) = self.sink {
            let _ = sink.send(terminal.clone()).await;
        }
        terminal
    }
}
