//! Server-Sent Events (SSE) wire encoding
//!
//! A frame is either a named event:
//!
//! ```text
//! event: <name>
//! data: <json>
//!
//! ```
//!
//! or a comment (`: <text>` followed by a blank line). Comments carry no event
//! name, so conforming clients drop them, but they still move bytes through
//! proxies and reset their idle timers. Heartbeats use the comment form.
//!
//! Handlers send frames through axum's [`Sse`](axum::response::sse::Sse)
//! response; [`SseFrame::encode`] spells out the same bytes for readers and
//! tests.

use axum::response::sse::Event;
use serde::Serialize;

/// Comment text of the frame sent before any waiting, so intermediaries start forwarding
pub const OPEN_COMMENT: &str = "open";

/// Comment text of periodic keepalive frames
pub const HEARTBEAT_COMMENT: &str = "hb";

/// One unit of SSE output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Named event with a single-line JSON payload
    Event { name: String, data: String },
    /// Comment line, ignored by clients
    Comment(String),
}

impl SseFrame {
    /// Build a named event frame, serializing `payload` as JSON.
    ///
    /// Non-ASCII text (e.g. ingredient names in other languages) is emitted
    /// verbatim as UTF-8, not `\u` escaped.
    pub fn event<T: Serialize + ?Sized>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(SseFrame::Event {
            name: name.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Build a comment frame; embedded line breaks are flattened to spaces
    pub fn comment(text: impl AsRef<str>) -> Self {
        SseFrame::Comment(text.as_ref().replace(['\r', '\n'], " "))
    }

    pub fn open() -> Self {
        SseFrame::comment(OPEN_COMMENT)
    }

    pub fn heartbeat() -> Self {
        SseFrame::comment(HEARTBEAT_COMMENT)
    }

    /// Event name, `None` for comments
    pub fn name(&self) -> Option<&str> {
        match self {
            SseFrame::Event { name, .. } => Some(name),
            SseFrame::Comment(_) => None,
        }
    }

    /// Event payload, `None` for comments
    pub fn data(&self) -> Option<&str> {
        match self {
            SseFrame::Event { data, .. } => Some(data),
            SseFrame::Comment(_) => None,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, SseFrame::Comment(_))
    }

    /// The text block axum writes on the wire for this frame
    pub fn encode(&self) -> String {
        match self {
            SseFrame::Event { name, data } => format!("event: {}\ndata: {}\n\n", name, data),
            SseFrame::Comment(text) => format!(": {}\n\n", text),
        }
    }

    /// Parse a complete SSE body back into frames.
    ///
    /// Used by readers of a finished stream (tests, CLI clients). Multi-line
    /// `data:` fields are joined with `\n` per the event-stream format.
    pub fn parse_all(body: &str) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        for block in body.split("\n\n") {
            let block = block.trim_matches('\n');
            if block.is_empty() {
                continue;
            }

            let mut name: Option<String> = None;
            let mut data: Vec<&str> = Vec::new();
            let mut comment: Option<String> = None;

            for line in block.lines() {
                if let Some(rest) = line.strip_prefix(':') {
                    comment = Some(rest.trim_start().to_string());
                } else if let Some(rest) = line.strip_prefix("event:") {
                    name = Some(rest.trim_start().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push(rest.strip_prefix(' ').unwrap_or(rest));
                }
            }

            match (name, comment) {
                (Some(name), _) => frames.push(SseFrame::Event {
                    name,
                    data: data.join("\n"),
                }),
                (None, Some(text)) if data.is_empty() => frames.push(SseFrame::Comment(text)),
                (None, _) if !data.is_empty() => frames.push(SseFrame::Event {
                    name: "message".to_string(),
                    data: data.join("\n"),
                }),
                _ => {}
            }
        }

        frames
    }
}

impl From<SseFrame> for Event {
    fn from(frame: SseFrame) -> Self {
        match frame {
            SseFrame::Event { name, data } => Event::default().event(name).data(data),
            SseFrame::Comment(text) => Event::default().comment(text),
        }
    }
}

/// Encode a named event straight to wire text
pub fn encode<T: Serialize + ?Sized>(
    event_name: &str,
    payload: &T,
) -> Result<String, serde_json::Error> {
    Ok(SseFrame::event(event_name, payload)?.encode())
}
