//! Line protocol between the editor plugin and the chat session
//!
//! Input is newline-delimited text. In the default mode a query may span
//! several lines and ends with the `END` sentinel; control commands stand on
//! a line of their own. Output is one JSON status record per dispatch,
//! followed by the `END_OF_RESPONSE` terminator line.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::TalkError;

/// Marks the end of a (possibly multi-line) query
pub const SENTINEL: &str = "END";

/// Written on its own line after every status record
pub const TERMINATOR: &str = "END_OF_RESPONSE";

const RECREATE_TOKEN: &str = "recreate_vector_store";
const EXIT_TOKENS: &[&str] = &["exit", "quit"];

/// How raw input lines are grouped into messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    /// Lines accumulate until one ends with the sentinel
    #[default]
    Sentinel,
    /// Every non-blank line is a complete message
    Line,
    /// Every non-blank line is a JSON object
    Json,
}

impl FromStr for ProtocolMode {
    type Err = TalkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sentinel" => Ok(Self::Sentinel),
            "line" => Ok(Self::Line),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(TalkError::Config(format!(
                "Unknown protocol mode: {}. Valid options: sentinel, line, json",
                s
            ))),
        }
    }
}

/// A complete unit of protocol input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A query for the query engine
    Query(String),
    /// Drop the current index and rebuild it from source
    RecreateVectorStore,
    /// Leave the read loop
    Exit,
    /// A line that could not be decoded (JSON mode only)
    Invalid(String),
}

/// Wire shape of a JSON-mode request
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonRequest {
    Query { query: String },
    Command { command: String },
}

/// Groups raw lines into [`Message`]s
#[derive(Debug, Default)]
pub struct MessageDecoder {
    mode: ProtocolMode,
    buffer: String,
}

impl MessageDecoder {
    pub fn new(mode: ProtocolMode) -> Self {
        Self {
            mode,
            buffer: String::new(),
        }
    }

    /// Text accumulated for a query that has not seen its sentinel yet
    pub fn pending(&self) -> Option<&str> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(&self.buffer)
        }
    }

    /// Drop any partial query, returning it
    pub fn discard_pending(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Feed one raw line. Returns a message once one is complete.
    pub fn push_line(&mut self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match self.mode {
            ProtocolMode::Sentinel => self.push_sentinel_line(line),
            ProtocolMode::Line => {
                let text = normalize(line);
                Some(control_message(&text).unwrap_or(Message::Query(text)))
            }
            ProtocolMode::Json => Some(decode_json(line)),
        }
    }

    fn push_sentinel_line(&mut self, line: &str) -> Option<Message> {
        let normalized = normalize(line);

        if let Some(control) = control_message(&normalized) {
            if let Some(partial) = self.discard_pending() {
                warn!("Discarding unfinished query: {:?}", partial.trim_end());
            }
            return Some(control);
        }

        // The plugin appends the sentinel with no separator (`query + "END"`),
        // so it is matched as a raw suffix rather than a separate token.
        match line.strip_suffix(SENTINEL) {
            Some(body) => {
                self.buffer.push_str(&normalize(body));
                let text = std::mem::take(&mut self.buffer).trim().to_string();
                if text.is_empty() {
                    debug!("Ignoring empty query");
                    return None;
                }
                Some(control_message(&text).unwrap_or(Message::Query(text)))
            }
            None => {
                self.buffer.push_str(&normalized);
                self.buffer.push(' ');
                None
            }
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn control_message(normalized: &str) -> Option<Message> {
    if normalized == RECREATE_TOKEN {
        Some(Message::RecreateVectorStore)
    } else if EXIT_TOKENS.contains(&normalized) {
        Some(Message::Exit)
    } else {
        None
    }
}

fn decode_json(line: &str) -> Message {
    match serde_json::from_str::<JsonRequest>(line) {
        Ok(JsonRequest::Query { query }) => {
            let query = query.trim().to_string();
            if query.is_empty() {
                Message::Invalid("Empty query".to_string())
            } else {
                Message::Query(query)
            }
        }
        Ok(JsonRequest::Command { command }) => control_message(&normalize(&command))
            .unwrap_or_else(|| Message::Invalid(format!("Unknown command: {}", command))),
        Err(e) => Message::Invalid(format!("Malformed request: {}", e)),
    }
}

/// Outcome of a dispatch as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One framed output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: Status,
    pub message: String,
    /// Answer text for a successful query; the field the editor plugin reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
}

impl StatusRecord {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            ai_response: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            ai_response: None,
        }
    }

    /// Successful answer to a query
    pub fn answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            status: Status::Success,
            message: text.clone(),
            ai_response: Some(text),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Writes status records and terminators to the protocol stream
pub struct ResponseWriter<W: Write> {
    out: W,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write the record and its terminator in a single write, then flush
    pub fn emit(&mut self, record: &StatusRecord) -> std::io::Result<()> {
        let mut frame = serde_json::to_string(record)?;
        frame.push('\n');
        frame.push_str(TERMINATOR);
        frame.push('\n');

        self.out.write_all(frame.as_bytes())?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Split captured protocol output back into records, checking that every
/// record is followed by the terminator
pub fn parse_frames(output: &str) -> Result<Vec<StatusRecord>, TalkError> {
    let mut records = Vec::new();
    let mut lines = output.lines();

    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let record: StatusRecord = serde_json::from_str(line)?;
        match lines.next() {
            Some(TERMINATOR) => records.push(record),
            other => {
                return Err(TalkError::Protocol(format!(
                    "expected terminator after record, found {:?}",
                    other
                )))
            }
        }
    }

    Ok(records)
}
