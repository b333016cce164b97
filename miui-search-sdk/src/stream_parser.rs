//! Incremental parser for the assistant's event stream
//!
//! The upstream pushes newline-delimited records. Every line is classified
//! into a [`StreamRecord`] and each kind has exactly one transition:
//!
//! | record      | effect                                             |
//! |-------------|----------------------------------------------------|
//! | `Fragment`  | non-empty answer is accumulated and forwarded      |
//! | `Done`      | parsing stops, remaining bytes are never read      |
//! | `Malformed` | line is skipped                                    |
//! | `Ignored`   | line is skipped                                    |
//!
//! End of input is a normal completion, so is `Done`. Only a transport
//! failure while reading aborts the parse.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::fmt::Display;
use tracing::{debug, trace};

use crate::{
    errors::{Result, SdkError},
    types::StreamChunk,
};

/// Receives each answer fragment the moment it is parsed.
pub type FragmentSink<'a> = dyn FnMut(&str) + Send + 'a;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Classification of a single stream line.
#[derive(Debug)]
pub enum StreamRecord {
    /// A `data:` line carrying a JSON chunk
    Fragment(StreamChunk),
    /// The `data:[DONE]` terminator
    Done,
    /// A `data:` line whose payload is not a valid chunk
    Malformed(serde_json::Error),
    /// Anything else (comments, `event:` lines, blank keep-alives)
    Ignored,
}

/// Classify one line of the event stream.
pub fn classify_line(line: &str) -> StreamRecord {
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return StreamRecord::Ignored;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return StreamRecord::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => StreamRecord::Fragment(chunk),
        Err(e) => StreamRecord::Malformed(e),
    }
}

/// Splits a byte stream into lines without assuming chunk boundaries line up
/// with line or UTF-8 boundaries.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline
    scanned: usize,
}

impl LineDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line they complete.
    ///
    /// Only the newly appended bytes are searched for a line break, so a long
    /// line delivered in many small chunks is scanned once.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Whatever is left after the input ended without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(rest)
    }
}

/// Accumulates the answer and forwards fragments.
struct AnswerBuilder<'s, 'a> {
    full: String,
    sink: Option<&'s mut FragmentSink<'a>>,
    fragments: usize,
    skipped: usize,
}

impl AnswerBuilder<'_, '_> {
    /// Returns `false` once the terminator was seen.
    fn apply(&mut self, line: &str) -> bool {
        match classify_line(line) {
            StreamRecord::Fragment(chunk) => {
                if let Some(info) = &chunk.intention_info {
                    trace!(
                        "Intention: {:?} (end: {})",
                        info.intention_text, info.end
                    );
                }
                if let Some(answer) = chunk.answer.filter(|a| !a.is_empty()) {
                    self.full.push_str(&answer);
                    self.fragments += 1;
                    if let Some(sink) = self.sink.as_deref_mut() {
                        sink(&answer);
                    }
                }
                true
            },
            StreamRecord::Done => false,
            StreamRecord::Malformed(e) => {
                self.skipped += 1;
                debug!("Skipping malformed stream record: {}", e);
                true
            },
            StreamRecord::Ignored => true,
        }
    }
}

/// Drive `stream` to completion and return the accumulated answer.
///
/// `on_fragment` is invoked synchronously, in arrival order, with every
/// non-empty answer fragment.
pub async fn parse_event_stream<S, E>(
    stream: S,
    on_fragment: Option<&mut FragmentSink<'_>>,
) -> Result<String>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = LineDecoder::new();
    let mut builder = AnswerBuilder {
        full: String::new(),
        sink: on_fragment,
        fragments: 0,
        skipped: 0,
    };

    'read: loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                for line in decoder.push(&bytes) {
                    if !builder.apply(&line) {
                        debug!("Stream terminated by sentinel");
                        break 'read;
                    }
                }
            },
            Some(Err(e)) => return Err(SdkError::interrupted(e.to_string())),
            None => {
                if let Some(rest) = decoder.finish() {
                    builder.apply(&rest);
                }
                debug!("Stream ended without sentinel");
                break;
            },
        }
    }

    debug!(
        "Parsed {} fragments ({} malformed records skipped), answer length {}",
        builder.fragments,
        builder.skipped,
        builder.full.len()
    );
    Ok(builder.full)
}
