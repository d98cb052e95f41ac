//! Stream decoding: chunked response body → [`TranslationEvent`]s.
//!
//! The body is a sequence of newline-delimited frames:
//!
//! ```text
//! : keep-alive                                  ← comment, ignored
//! event: message                                ← ignored
//! data: {"content":"Bonjour"}                   ← envelope, payload "Bonjour"
//! data: {"content":"{\"arguments\":{\"input\":\"https://…/a.docx\"}}"}
//! data: [DONE]                                  ← terminal marker
//! ```
//!
//! Lines are split on raw bytes before any UTF-8 decoding, so a multi-byte
//! character cut across two network chunks is always reassembled first.
//! Malformed frames are logged and skipped; only a failing body ends the
//! sequence with an error.

use crate::error::TranslateError;
use crate::output::TranslationEvent;
use crate::pipeline::payload::PayloadExtractor;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lazy sequence of decoded events for one transport call.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TranslationEvent, TranslateError>> + Send>>;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Classification of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Blank line, comment, non-data field, malformed or empty frame.
    Ignored,
    /// The terminal marker.
    Done,
    /// Effective payload of a data frame.
    Payload(String),
}

/// Incremental line splitter that yields effective payloads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminal marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Append a chunk and return the payloads of every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            let line = String::from_utf8_lossy(&self.buf[consumed..end]).into_owned();
            consumed = end + 1;
            if self.accept(&line, &mut payloads) {
                break;
            }
        }
        self.buf.drain(..consumed);
        if self.done {
            self.buf.clear();
        }
        payloads
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.done && !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.accept(&line, &mut payloads);
        }
        self.buf.clear();
        payloads
    }

    /// Returns true when the line was the terminal marker.
    fn accept(&mut self, line: &str, payloads: &mut Vec<String>) -> bool {
        match decode_line(line) {
            Frame::Payload(p) => {
                payloads.push(p);
                false
            }
            Frame::Done => {
                self.done = true;
                true
            }
            Frame::Ignored => false,
        }
    }
}

/// Classify one line (without its trailing `\n`).
pub fn decode_line(line: &str) -> Frame {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(raw) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };
    let raw = raw.trim();
    if raw == DONE_MARKER {
        return Frame::Done;
    }
    if raw.is_empty() {
        return Frame::Ignored;
    }

    let envelope: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Skipping malformed frame ({}): {}", e, truncate(raw, 120));
            return Frame::Ignored;
        }
    };

    match effective_payload(&envelope) {
        Some(p) if !p.is_empty() => Frame::Payload(p),
        _ => Frame::Ignored,
    }
}

/// `content` verbatim, or the nested `input` when `content` is itself JSON.
///
/// A `content` that looks like a JSON object but fails to parse yields an
/// empty payload.
fn effective_payload(envelope: &Value) -> Option<String> {
    let content = envelope.get("content")?;
    let text = match content {
        Value::String(s) => s,
        Value::Object(_) => return Some(nested_input(content)),
        _ => return None,
    };

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(nested) => Some(nested_input(&nested)),
            Err(e) => {
                debug!("Nested content is not valid JSON ({}), dropping payload", e);
                Some(String::new())
            }
        }
    } else {
        Some(text.clone())
    }
}

fn nested_input(v: &Value) -> String {
    v.pointer("/arguments/input")
        .or_else(|| v.get("input"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: FrameDecoder,
    extractor: Arc<dyn PayloadExtractor>,
    pending: VecDeque<TranslationEvent>,
    closed: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, payloads: Vec<String>) {
        let extractor = &self.extractor;
        self.pending
            .extend(payloads.iter().filter_map(|p| extractor.extract(p)));
    }
}

/// Decode a chunked body into events.
///
/// The returned stream ends after the terminal marker or when the body
/// closes. A body error is yielded once as [`TranslateError::TransportFailed`]
/// and ends the stream.
pub fn decode_stream<S, B, E>(body: S, extractor: Arc<dyn PayloadExtractor>) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: FrameDecoder::new(),
        extractor,
        pending: VecDeque::new(),
        closed: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(ev) = st.pending.pop_front() {
                return Some((Ok(ev), st));
            }
            if st.closed {
                return None;
            }
            if st.decoder.is_done() {
                st.closed = true;
                continue;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = st.decoder.feed(chunk.as_ref());
                    st.enqueue(payloads);
                }
                Some(Err(e)) => {
                    st.closed = true;
                    return Some((
                        Err(TranslateError::TransportFailed {
                            status: None,
                            detail: format!("response body failed mid-stream: {e}"),
                        }),
                        st,
                    ));
                }
                None => {
                    let payloads = st.decoder.finish();
                    st.enqueue(payloads);
                    st.closed = true;
                }
            }
        }
    }))
}
