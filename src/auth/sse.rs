//! Incremental decoder for the `text/event-stream` format.

use anyhow::{Result, bail};

/// Longest line or event payload the decoder buffers.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// A dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseMessage {
    /// The `event:` field, if the server set one.
    pub event: Option<String>,
    pub data: String,
    /// Last event id seen on this stream at dispatch time.
    pub id: Option<String>,
}

impl SseMessage {
    /// Unnamed events and events named `message` are regular messages.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Turns arbitrary chunks of bytes into complete events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed. Fails once a
    /// single line or event outgrows [`MAX_EVENT_BYTES`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseMessage>> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
            if self.data.len() > MAX_EVENT_BYTES {
                bail!("Event stream payload exceeds {} bytes", MAX_EVENT_BYTES);
            }
        }
        if self.buffer.len() > MAX_EVENT_BYTES {
            bail!("Event stream line exceeds {} bytes", MAX_EVENT_BYTES);
        }
        Ok(messages)
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => {
                self.last_event_id = Some(value.to_string()).filter(|id| !id.is_empty());
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseMessage {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
        })
    }
}
