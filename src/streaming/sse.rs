//! Server-Sent Events parser
//!
//! Incremental parser for the `text/event-stream` framing used by the
//! OpenAI-family, Baidu and Gemini streaming endpoints. Byte chunks may be
//! split at arbitrary offsets; incomplete lines and events are buffered
//! until the next call.

/// One parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Event type from an `event:` line, if any
    pub event_type: Option<String>,

    /// Payload assembled from `data:` lines
    pub data: String,
}

impl SseEvent {
    /// Check if event has accumulated any data
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.data.is_empty()
    }

    /// Check if this is the `[DONE]` marker used by OpenAI-style streams
    #[must_use]
    pub fn is_done_marker(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Incremental SSE parser
pub struct SseParser {
    current_event: SseEvent,
    line_buffer: String,
    byte_buffer: Vec<u8>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_event: SseEvent::default(),
            line_buffer: String::new(),
            byte_buffer: Vec::new(),
        }
    }

    /// Parse a chunk of raw transport bytes
    ///
    /// Transports split at arbitrary byte offsets, including inside a
    /// multibyte character. An incomplete trailing UTF-8 sequence is held
    /// back until the next chunk; invalid byte sequences are dropped.
    pub fn parse_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.byte_buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            match std::str::from_utf8(&self.byte_buffer) {
                Ok(text) => {
                    let text = text.to_string();
                    self.byte_buffer.clear();
                    events.extend(self.parse_chunk(&text));
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    let text = String::from_utf8_lossy(&self.byte_buffer[..valid]).into_owned();
                    match e.error_len() {
                        // Incomplete tail: wait for the next chunk
                        None => {
                            self.byte_buffer.drain(..valid);
                            events.extend(self.parse_chunk(&text));
                            break;
                        }
                        Some(bad) => {
                            self.byte_buffer.drain(..valid + bad);
                            events.extend(self.parse_chunk(&text));
                        }
                    }
                }
            }
        }
        events
    }

    /// Parse a chunk of SSE text
    ///
    /// Returns completed events; incomplete events stay buffered.
    pub fn parse_chunk(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();

        self.line_buffer.push_str(chunk);

        while let Some(line_end) = self.line_buffer.find('\n') {
            let line = self.line_buffer[..line_end]
                .trim_end_matches('\r')
                .to_string();
            self.line_buffer.drain(..=line_end);

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        // Empty line terminates the current event
        if line.is_empty() {
            if self.current_event.is_complete() {
                return Some(std::mem::take(&mut self.current_event));
            }
            return None;
        }

        // Comment lines (heartbeats) are skipped
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.current_event.event_type = Some(value.to_string()),
            "data" => {
                if !self.current_event.data.is_empty() {
                    self.current_event.data.push('\n');
                }
                self.current_event.data.push_str(value);
            }
            _ => {}
        }

        None
    }

    /// Flush the trailing event of a stream that ended without a blank line
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.byte_buffer.is_empty() {
            let tail = String::from_utf8_lossy(&self.byte_buffer).into_owned();
            self.byte_buffer.clear();
            self.line_buffer.push_str(&tail);
        }

        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            self.process_line(&line);
        }

        if self.current_event.is_complete() {
            Some(std::mem::take(&mut self.current_event))
        } else {
            None
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
