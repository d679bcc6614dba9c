//! Incremental decoder for OpenAI-compatible `text/event-stream` chat completions.
//!
//! Upstream chunking is arbitrary: a `data:` line may be split across network reads,
//! so bytes are buffered until a full line is available.

use bytes::BytesMut;
use serde::Deserialize;
use tracing::debug;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";
const CONTENT_FILTER: &str = "content_filter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A non-empty piece of assistant text.
    Delta(String),
    /// Upstream signalled the end of the reply.
    Done,
    /// Upstream stopped the reply on a content-safety rule.
    Blocked(String),
    /// Upstream reported an error inside an otherwise successful response.
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Feeds raw bytes and returns every event completed by them, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes a trailing line that arrived without a final newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        parse_line(String::from_utf8_lossy(&rest).trim())
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix(DATA_PREFIX)?.trim_start();
    if data == DONE_MARKER {
        return Some(SseEvent::Done);
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping undecodable stream line: {e}");
            return None;
        }
    };

    if let Some(error) = chunk.error {
        return Some(SseEvent::Failed(error.message));
    }

    let choice = chunk.choices.into_iter().next()?;
    if choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
        return Some(SseEvent::Blocked(
            "reply stopped by the upstream content filter".to_string(),
        ));
    }

    choice
        .delta
        .content
        .filter(|text| !text.is_empty())
        .map(SseEvent::Delta)
}
