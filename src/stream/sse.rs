//! Server-Sent Events framing.
//!
//! Incremental parser for `text/event-stream` bodies. Chunks can split lines
//! and events anywhere; the parser buffers until a full line is available.

/// Name of events sent without an `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event_type: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// The event name, `message` when none was given.
    pub fn name(&self) -> &str {
        self.event_type.as_deref().unwrap_or(DEFAULT_EVENT)
    }
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
    id_buffer: Option<String>,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the last dispatched event, to resume from after a reconnect.
    /// An `id:` line only takes effect once its event is complete.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk of the body, returning every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.buffer[consumed..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let end = consumed + offset;
            let terminator_len = if self.buffer[end] == b'\r' {
                match self.buffer.get(end + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A lone trailing CR may be the first half of CRLF.
                    None => break,
                }
            } else {
                1
            };

            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + terminator_len;

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.buffer.drain(..consumed);
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // comment / keep-alive
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.id_buffer = Some(value.to_string());
                }
            }
            // `retry` is ignored, the reconnection delay comes from configuration
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.id_buffer.is_some() {
            self.last_event_id.clone_from(&self.id_buffer);
        }
        let event_type = self.event_type.take().filter(|t| !t.is_empty());
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event_type, data })
    }
}
