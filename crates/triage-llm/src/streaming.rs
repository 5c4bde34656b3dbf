use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use tracing::warn;

use triage_core::error::{Result, TriageError};

/// Incremental parser for a server-sent events byte stream.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data = Vec::new();

    for line in block.lines() {
        if let Some(val) = line.strip_prefix("event:") {
            event_type = Some(val.trim_start().to_string());
        } else if let Some(val) = line.strip_prefix("data:") {
            data.push(val.strip_prefix(' ').unwrap_or(val));
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event_type,
        data: data.join("\n"),
    })
}

/// Turn a raw HTTP byte stream into a stream of SSE events.
///
/// A transport error is yielded once as `LlmStream` and ends the stream.
pub fn sse_events<S, B, E>(inner: S) -> impl Stream<Item = Result<SseEvent>>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        Some((inner, SseParser::new(), VecDeque::new())),
        |state| async move {
            let (mut inner, mut parser, mut pending) = state?;
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), Some((inner, parser, pending))));
                }
                match inner.next().await {
                    Some(Ok(chunk)) => pending.extend(parser.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        warn!(error = %e, "SSE transport error, closing stream");
                        return Some((Err(TriageError::LlmStream(e.to_string())), None));
                    }
                    None => return None,
                }
            }
        },
    )
}
