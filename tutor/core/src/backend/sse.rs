//! Server-sent event framing for streamed chat completions
//!
//! The completion API streams newline-delimited `data: {...}` lines and ends
//! with `data: [DONE]`. Bytes are buffered until a full line is available so
//! multi-byte characters split across chunks decode correctly.

use serde::Deserialize;

/// A decoded stream event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// A content fragment
    Delta(String),
    /// The `[DONE]` sentinel
    Done,
}

#[derive(Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Incremental decoder for `data:` frames
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it
    ///
    /// Nothing is returned after the `[DONE]` sentinel has been seen.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Decode whatever is left once the connection closes
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        self.decode_line(&line, &mut events);
        events
    }

    /// Whether the `[DONE]` sentinel has been seen
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        if self.done {
            return;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }

        let Some(data) = line.strip_prefix("data:") else {
            tracing::trace!(line = %line, "Skipping non-data stream line");
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            events.push(SseEvent::Done);
            return;
        }

        match serde_json::from_str::<ChunkFrame>(data) {
            Ok(frame) => {
                let content = frame
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|text| !text.is_empty());
                if let Some(text) = content {
                    events.push(SseEvent::Delta(text));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed stream frame");
            }
        }
    }
}
