//! # sse-decode
//!
//! Incremental decoder for the `text/event-stream` wire format
//! ([WHATWG HTML §9.2](https://html.spec.whatwg.org/multipage/server-sent-events.html)).
//!
//! HTTP clients hand out response bodies as arbitrary byte chunks: a single
//! event may be split across several chunks, or one chunk may carry many
//! events. [`SseDecoder`] buffers partial lines between calls and returns
//! only complete events.
//!
//! ## Usage
//!
//! ```rust
//! use sse_decode::SseDecoder;
//!
//! let mut decoder = SseDecoder::new();
//! let mut events = decoder.feed(b"event: progress\ndata: {\"current\":1}").unwrap();
//! assert!(events.is_empty()); // event not terminated yet
//!
//! events = decoder.feed(b"\n\n").unwrap();
//! assert_eq!(events[0].event, "progress");
//! assert_eq!(events[0].data, "{\"current\":1}");
//! ```
//!
//! ## What is (and is not) handled
//!
//! | Field   | Behaviour |
//! |---------|-----------|
//! | `event` | names the event; defaults to `message` |
//! | `data`  | multiple lines are joined with `\n` |
//! | `id`    | stored on the event; `last_event_id` persists across events |
//! | `retry` | parsed as milliseconds; invalid values are ignored |
//! | `:`     | comment line, ignored (servers use it as keep-alive) |
//!
//! Lines may end in `\n`, `\r\n` or a lone `\r`. Invalid UTF-8 is replaced
//! with U+FFFD, as the format requires.

use thiserror::Error;

// ── Public types ─────────────────────────────────────────────────────────────

/// Event name used when the server does not send an `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One fully received Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name (`event:` field), or [`DEFAULT_EVENT`].
    pub event: String,
    /// Concatenated `data:` lines.
    pub data: String,
    /// Last event id seen on the stream, if any.
    pub id: Option<String>,
    /// Reconnection delay requested by the server, in milliseconds.
    pub retry: Option<u64>,
}

/// Errors returned by [`SseDecoder`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseError {
    /// A single line grew beyond the configured limit without a terminator.
    ///
    /// `decoded` holds the other events completed by the same chunk. The
    /// event the long line belonged to is dropped; decoding resumes after
    /// the line.
    #[error("event stream line exceeds {limit} bytes without a line break")]
    LineTooLong { limit: usize, decoded: Vec<SseEvent> },
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// Default upper bound for one unterminated line (256 MiB).
///
/// Completed-job payloads can carry whole HTML documents with inline images,
/// so the limit is generous; it only exists so a misbehaving server cannot
/// grow the buffer forever.
pub const DEFAULT_MAX_LINE: usize = 256 * 1024 * 1024;

/// Stateful, incremental event-stream decoder.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
    max_line: usize,
    // a chunk ended in '\r'; a leading '\n' in the next chunk belongs to it
    pending_cr: bool,
    // dropping the rest of an overlong line
    skip_line: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Create a decoder with [`DEFAULT_MAX_LINE`].
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create a decoder that rejects lines longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            event: None,
            data: Vec::new(),
            retry: None,
            last_event_id: None,
            max_line: max_line.max(1),
            pending_cr: false,
            skip_line: false,
        }
    }

    /// Last `id:` received on this stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk of bytes and return every event it completed.
    ///
    /// # Errors
    /// [`SseError::LineTooLong`] when a line in the chunk, or its
    /// unterminated tail, passes the limit. The decoder stays usable
    /// afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SseError> {
        let mut events = Vec::new();
        let mut bytes = chunk;

        if self.pending_cr {
            self.pending_cr = false;
            if let Some(rest) = bytes.strip_prefix(b"\n") {
                bytes = rest;
            }
        }

        let mut overflow = false;
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' | b'\r' => {
                    if self.skip_line {
                        self.skip_line = false;
                    } else {
                        self.buf.extend_from_slice(&bytes[start..i]);
                        let line = std::mem::take(&mut self.buf);
                        if line.len() > self.max_line {
                            self.discard_event();
                            overflow = true;
                        } else if let Some(event) = self.process_line(&line) {
                            events.push(event);
                        }
                    }
                    if bytes[i] == b'\r' {
                        if i + 1 == bytes.len() {
                            self.pending_cr = true;
                        } else if bytes[i + 1] == b'\n' {
                            i += 1;
                        }
                    }
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }

        if !self.skip_line {
            self.buf.extend_from_slice(&bytes[start..]);
        }
        if self.buf.len() > self.max_line {
            self.buf.clear();
            self.discard_event();
            self.skip_line = true;
            overflow = true;
        }

        if overflow {
            return Err(SseError::LineTooLong {
                limit: self.max_line,
                decoded: events,
            });
        }

        Ok(events)
    }

    /// Drop any partially received event, e.g. at end of stream.
    ///
    /// An event that was not terminated by a blank line is discarded, never
    /// dispatched. `last_event_id` survives so a reconnect can resume.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discard_event();
        self.pending_cr = false;
        self.skip_line = false;
    }

    fn discard_event(&mut self) {
        self.event = None;
        self.data.clear();
        self.retry = None;
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        let line = String::from_utf8_lossy(line);
        let line: &str = &line;
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_event_id.clone(),
            retry,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
