//! Incremental parsing of chat-completion response bodies.
//!
//! A [`StreamParser`] is fed every chunk of bytes the connection delivers and
//! turns them into [`OutputRecord`]s. Two body shapes are understood:
//! - an event stream of `data: {json}` lines (`stream: true`)
//! - a single JSON document delivered in one or more chunks (`stream: false`)

use std::fmt::Display;
use std::mem;

use serde_json::Value;
use tracing::{debug, warn};

use crate::record::{Failure, OutputRecord, RecordStatus};

const EVENT_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
const FINISH_STOP: &str = "stop";

/// Largest run of bytes kept while waiting for a line break.
pub const MAX_PENDING_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Streaming,
    Whole,
}

impl ResponseMode {
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream {
            ResponseMode::Streaming
        } else {
            ResponseMode::Whole
        }
    }

    /// Key inside each `choices[]` entry that carries the text.
    fn content_key(self) -> &'static str {
        match self {
            ResponseMode::Streaming => "delta",
            ResponseMode::Whole => "message",
        }
    }
}

/// Everything gathered from the fragments of one data-arrival event.
#[derive(Debug, Default)]
struct Batch {
    id: Option<String>,
    content: String,
    done: bool,
    error: Option<String>,
    parsed: usize,
}

impl Batch {
    /// Folds one JSON object into the batch. Returns `false` once the batch
    /// holds an API error; no later fragment may contribute content.
    fn absorb(&mut self, obj: &Value, content_key: &str) -> bool {
        self.parsed += 1;

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            self.id = Some(id.to_string());
        }

        if let Some(error) = obj.get("error").filter(|v| v.is_object()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.error = Some(message.to_string());
            return false;
        }

        let choices = obj
            .get("choices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for choice in choices {
            if let Some(text) = choice
                .get(content_key)
                .filter(|v| v.is_object())
                .and_then(|v| v.get("content"))
                .and_then(Value::as_str)
            {
                self.content.push_str(text);
            }
            if choice.get("finish_reason").and_then(Value::as_str) == Some(FINISH_STOP) {
                self.done = true;
            }
        }
        true
    }

    fn into_record(self) -> OutputRecord {
        let record = match self.error {
            Some(message) => OutputRecord::from(Failure::Api(message)),
            None if self.done => OutputRecord::done(self.content),
            None => OutputRecord::pending(self.content),
        };
        record.with_id(self.id)
    }
}

/// Per-request response parser. Create a fresh one for every request.
#[derive(Debug)]
pub struct StreamParser {
    mode: ResponseMode,
    buffer: Vec<u8>,
    malformed: usize,
    finished: bool,
}

impl StreamParser {
    pub fn new(mode: ResponseMode) -> Self {
        Self {
            mode,
            buffer: Vec::new(),
            malformed: 0,
            finished: false,
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Number of streamed fragments (or whole bodies) that were not valid JSON
    /// objects and were skipped.
    pub fn malformed_fragments(&self) -> usize {
        self.malformed
    }

    /// True once a DONE, ERROR or STOPPED record has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Handles one data-arrival event.
    ///
    /// In streaming mode every complete line received so far is processed and
    /// the fragments found are merged into at most one record. Bytes after the
    /// last newline are kept until the next arrival, unless they already form
    /// complete fragments. More than [`MAX_PENDING_BYTES`] without a line
    /// break fails the request. In whole mode the bytes are only buffered; the
    /// record is produced by [`finish`](Self::finish).
    pub fn feed(&mut self, chunk: &[u8]) -> Option<OutputRecord> {
        if self.finished {
            debug!(bytes = chunk.len(), "ignoring data after terminal record");
            return None;
        }

        self.buffer.extend_from_slice(chunk);
        if self.mode == ResponseMode::Whole {
            return None;
        }

        let mut fragments = Vec::new();
        if let Some(end) = self.buffer.iter().rposition(|&b| b == b'\n') {
            let complete: Vec<u8> = self.buffer.drain(..=end).collect();
            fragments = split_lines(&String::from_utf8_lossy(&complete));
        }

        if !self.buffer.is_empty() {
            if let Some(tail) = complete_tail(&self.buffer) {
                self.buffer.clear();
                fragments.extend(tail);
            } else if self.buffer.len() > MAX_PENDING_BYTES {
                warn!(bytes = self.buffer.len(), "stream line exceeds buffer limit");
                return self.fail_with(Failure::Transport(format!(
                    "stream line exceeds {MAX_PENDING_BYTES} bytes without a line break"
                )));
            }
        }

        self.settle(fragments)
    }

    /// Handles the end of the response body and always yields the request's
    /// terminal record unless one was already produced.
    pub fn finish(&mut self) -> Option<OutputRecord> {
        if self.finished {
            return None;
        }

        let rest = mem::take(&mut self.buffer);
        let record = match self.mode {
            ResponseMode::Streaming => {
                let fragments = split_lines(&String::from_utf8_lossy(&rest));
                match self.settle(fragments) {
                    Some(record) if record.status.is_terminal() => record,
                    Some(mut record) => {
                        record.status = RecordStatus::Done;
                        record
                    }
                    None => OutputRecord::done(""),
                }
            }
            ResponseMode::Whole => self.parse_whole(&rest),
        };

        self.finished = true;
        Some(record)
    }

    /// Handles a connection that failed before the body completed.
    ///
    /// `stopped` reports whether the user asked for the abort; the record is
    /// then STOPPED with the fixed message instead of an ERROR.
    pub fn fail(&mut self, description: &str, stopped: bool) -> Option<OutputRecord> {
        let failure = if stopped {
            Failure::UserStopped
        } else {
            Failure::Transport(description.to_string())
        };
        self.fail_with(failure)
    }

    /// Handles a non-success HTTP status. The body is inspected for an API
    /// `error.message`; without one the status itself is reported.
    pub fn reject(&mut self, status: impl Display, body: &[u8]) -> Option<OutputRecord> {
        let message = serde_json::from_slice::<Value>(body).ok().and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        });

        let failure = match message {
            Some(message) => Failure::Api(message),
            None => Failure::Transport(format!("server replied: {status}")),
        };
        self.fail_with(failure)
    }

    fn fail_with(&mut self, failure: Failure) -> Option<OutputRecord> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.buffer.clear();
        Some(failure.into())
    }

    fn settle(&mut self, fragments: Vec<Fragment>) -> Option<OutputRecord> {
        let content_key = self.mode.content_key();
        let mut batch = Batch::default();

        for fragment in fragments {
            match fragment {
                Fragment::Object(obj) => {
                    if !batch.absorb(&obj, content_key) {
                        break;
                    }
                }
                Fragment::Malformed { len, reason } => self.skip_malformed(len, &reason),
            }
        }

        if batch.parsed == 0 {
            return None;
        }

        let record = batch.into_record();
        if record.status.is_terminal() {
            self.finished = true;
        }
        Some(record)
    }

    fn parse_whole(&mut self, body: &[u8]) -> OutputRecord {
        match serde_json::from_slice::<Value>(body) {
            Ok(obj) if obj.is_object() => {
                let mut batch = Batch::default();
                batch.absorb(&obj, self.mode.content_key());
                batch.done = true;
                batch.into_record()
            }
            Ok(_) => {
                self.malformed += 1;
                warn!(bytes = body.len(), "response body is not a JSON object");
                Failure::Transport("malformed response body: not a JSON object".to_string())
                    .into()
            }
            Err(e) => {
                self.malformed += 1;
                warn!(bytes = body.len(), error = %e, "response body is not valid JSON");
                Failure::Transport(format!("malformed response body: {e}")).into()
            }
        }
    }

    fn skip_malformed(&mut self, fragment_len: usize, reason: &str) {
        self.malformed += 1;
        warn!(
            malformed = self.malformed,
            fragment_len,
            "skipping malformed stream fragment: {}",
            reason
        );
    }
}

/// One `data:` payload found in the event stream.
#[derive(Debug)]
enum Fragment {
    Object(Value),
    Malformed { len: usize, reason: String },
}

fn split_lines(text: &str) -> Vec<Fragment> {
    text.lines().flat_map(split_line).collect()
}

/// Splits one line on the event prefix. Each payload is read as exactly one
/// JSON value, so a prefix inside a string never starts a new fragment.
/// Lines that do not start with the prefix yield nothing.
fn split_line(line: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let Some(mut rest) = line.trim().strip_prefix(EVENT_PREFIX) else {
        return fragments;
    };

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return fragments;
        }

        let consumed = if rest.starts_with(EVENT_PREFIX) {
            0
        } else if let Some(after) = rest.strip_prefix(DONE_SENTINEL) {
            rest.len() - after.len()
        } else {
            let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
            match values.next() {
                Some(Ok(obj)) if obj.is_object() => {
                    fragments.push(Fragment::Object(obj));
                    values.byte_offset()
                }
                Some(Ok(_)) => {
                    let len = values.byte_offset();
                    fragments.push(Fragment::Malformed {
                        len,
                        reason: "not a JSON object".to_string(),
                    });
                    len
                }
                Some(Err(e)) => {
                    // Resume at the next prefix, if the line has one.
                    let next = rest.find(EVENT_PREFIX).unwrap_or(rest.len());
                    fragments.push(Fragment::Malformed {
                        len: next,
                        reason: e.to_string(),
                    });
                    next
                }
                None => return fragments,
            }
        };

        let tail = rest[consumed..].trim_start();
        match tail.strip_prefix(EVENT_PREFIX) {
            Some(next) => rest = next,
            None => {
                if !tail.is_empty() {
                    fragments.push(Fragment::Malformed {
                        len: tail.len(),
                        reason: "unexpected text after fragment".to_string(),
                    });
                }
                return fragments;
            }
        }
    }
}

/// Fragments held in bytes that have no line break yet, provided every one of
/// them is already complete.
fn complete_tail(bytes: &[u8]) -> Option<Vec<Fragment>> {
    let text = std::str::from_utf8(bytes).ok()?;
    let fragments = split_line(text);
    let complete = !fragments.is_empty()
        && fragments
            .iter()
            .all(|fragment| matches!(fragment, Fragment::Object(_)));
    complete.then_some(fragments)
}
