//! Incremental server-sent events parser.
//!
//! Bytes arrive in arbitrary chunks; [`SseParser::feed`] buffers partial
//! lines and returns every event completed by the chunk. Lines end with
//! `\n`, `\r\n` or a lone `\r`. A blank line dispatches the pending event.
//! A line longer than the configured limit is an error; the connection
//! should be dropped.

use crate::errors::StreamError;

/// Default upper bound for one line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// Value of the last `id:` field.
    pub id: Option<String>,
    /// Value of the last `event:` field.
    pub name: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: Option<String>,
    /// Value of a `retry:` field, in milliseconds.
    pub retry_ms: Option<u64>,
}

impl StreamEvent {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.data.is_none() && self.retry_ms.is_none()
    }
}

/// Streaming parser state.
#[derive(Debug)]
pub struct SseParser {
    line: Vec<u8>,
    max_line_length: usize,
    // A `\r` ended the previous chunk; a leading `\n` in the next one belongs to it.
    pending_cr: bool,
    event: StreamEvent,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            line: Vec::new(),
            max_line_length,
            pending_cr: false,
            event: StreamEvent::default(),
        }
    }

    /// Consume a chunk and return the events it completes, in order.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::LineTooLong` once the unterminated line grows
    /// past the limit. Partial state is discarded.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, StreamError> {
        let mut events = Vec::new();
        let mut bytes = chunk.iter().copied().peekable();

        if self.pending_cr {
            self.pending_cr = false;
            if bytes.peek() == Some(&b'\n') {
                bytes.next();
            }
        }

        while let Some(byte) = bytes.next() {
            match byte {
                b'\n' => self.end_line(&mut events),
                b'\r' => {
                    match bytes.peek() {
                        Some(b'\n') => {
                            bytes.next();
                        }
                        Some(_) => {}
                        None => self.pending_cr = true,
                    }
                    self.end_line(&mut events);
                }
                _ => {
                    if self.line.len() >= self.max_line_length {
                        self.reset();
                        return Err(StreamError::LineTooLong {
                            limit: self.max_line_length,
                        });
                    }
                    self.line.push(byte);
                }
            }
        }

        Ok(events)
    }

    /// Discard partial state, e.g. after the connection drops.
    pub fn reset(&mut self) {
        self.line.clear();
        self.pending_cr = false;
        self.event = StreamEvent::default();
    }

    fn end_line(&mut self, events: &mut Vec<StreamEvent>) {
        let line = std::mem::take(&mut self.line);

        if line.is_empty() {
            let event = std::mem::take(&mut self.event);
            if !event.is_empty() {
                events.push(event);
            }
            return;
        }

        let line = String::from_utf8_lossy(&line);
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event.name = Some(value.to_string()),
            "data" => match &mut self.event.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.event.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.event.id = Some(value.to_string()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                self.event.retry_ms = value.parse().ok();
            }
            _ => {}
        }
    }
}
