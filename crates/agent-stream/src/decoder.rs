//! Turns raw transport lines into typed stream events.
//!
//! Lines arrive framed the way chunked event streams frame them (`data: ...`).
//! A line is either dropped (blank), a completion sentinel, a terminal error
//! object, or a message whose `content` and `metadata` are themselves
//! JSON-encoded strings.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::DecodeError;
use crate::model::ThreadId;

const FRAME_PREFIX: &str = "data:";

const COMPLETION_SENTINELS: [&str; 2] = [
    r#"{"type": "status", "status": "completed", "message": "Agent run completed successfully"}"#,
    r#"{"type":"status","status":"completed","message":"Agent run completed successfully"}"#,
];

const ENDED_AFTER_COMPLETION: [&str; 2] = [
    "Run data not available for streaming",
    "Stream ended with status: completed",
];

const DEFAULT_ERROR_MESSAGE: &str = "agent run reported an error";

/// A decoded stream line.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The run finished; no status query is needed to confirm it.
    Completed,
    /// The backend reported a terminal error for the run.
    Error { message: String },
    /// A structured message.
    Message(StreamMessage),
}

/// Message `type` discriminator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Assistant,
    Tool,
    Status,
    User,
    System,
}

/// `metadata.stream_status` of an in-progress assistant message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    /// Partial text.
    Chunk,
    /// The message is fully assembled.
    Complete,
}

/// `status_type` discriminator carried by `status` messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    ToolStarted,
    ToolCompleted,
    ToolFailed,
    ToolError,
    ThreadRunEnd,
    Finish,
    Error,
    #[serde(other)]
    Other,
}

/// Decoded `content` of a `status` message.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusContent {
    pub status_type: Option<StatusType>,
    pub function_name: Option<String>,
    pub arguments: Option<Value>,
    pub xml_tag_name: Option<String>,
    pub tool_index: Option<i64>,
    pub message: Option<String>,
    pub finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct MessageMetadata {
    stream_status: Option<ChunkStatus>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct AssistantContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    message_id: Option<String>,
    thread_id: Option<String>,
    #[serde(rename = "type")]
    kind: MessageKind,
    is_llm_message: Option<bool>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    metadata: Value,
    created_at: Option<String>,
    updated_at: Option<String>,
    sequence: Option<i64>,
}

/// A structured stream message with its nested payloads decoded.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct StreamMessage {
    pub message_id: Option<String>,
    pub thread_id: Option<ThreadId>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub is_llm_message: bool,
    /// Decoded `content` object (`{}` when the wire string did not parse).
    pub content: Value,
    /// Decoded `metadata` object (`{}` when the wire string did not parse).
    pub metadata: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub sequence: Option<i64>,
}

impl StreamMessage {
    /// `metadata.stream_status`, if present and recognized.
    pub fn stream_status(&self) -> Option<ChunkStatus> {
        serde_json::from_value::<MessageMetadata>(self.metadata.clone())
            .unwrap_or_default()
            .stream_status
    }

    /// Text carried by an assistant message.
    pub fn assistant_text(&self) -> Option<String> {
        if self.kind != MessageKind::Assistant {
            return None;
        }
        serde_json::from_value::<AssistantContent>(self.content.clone())
            .unwrap_or_default()
            .content
    }

    /// Decoded status payload for `status` messages.
    pub fn status_content(&self) -> Option<StatusContent> {
        if self.kind != MessageKind::Status {
            return None;
        }
        Some(serde_json::from_value(self.content.clone()).unwrap_or_default())
    }
}

/// Message handed to the consumer once it is structurally complete.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct FinalizedMessage(StreamMessage);

impl FinalizedMessage {
    /// Wraps a message that carries a stable identifier.
    pub fn from_message(message: StreamMessage) -> Option<Self> {
        match message.message_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Some(Self(message)),
            _ => None,
        }
    }

    pub fn message_id(&self) -> &str {
        self.0.message_id.as_deref().unwrap_or_default()
    }

    pub fn message(&self) -> &StreamMessage {
        &self.0
    }

    pub fn into_inner(self) -> StreamMessage {
        self.0
    }
}

/// Decodes one raw transport line.
///
/// Returns `Ok(None)` for blank lines. Errors mean the line should be dropped;
/// they never end the stream.
pub fn decode_line(raw: &str) -> Result<Option<StreamEvent>, DecodeError> {
    let line = strip_frame(raw);
    if line.is_empty() {
        return Ok(None);
    }
    if is_completion_sentinel(line) {
        return Ok(Some(StreamEvent::Completed));
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    decode_value(value).map(Some)
}

fn strip_frame(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix(FRAME_PREFIX)
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn is_completion_sentinel(line: &str) -> bool {
    COMPLETION_SENTINELS.contains(&line)
        || ENDED_AFTER_COMPLETION
            .iter()
            .any(|marker| line.contains(marker))
}

fn decode_value(value: Value) -> Result<StreamEvent, DecodeError> {
    let Value::Object(ref object) = value else {
        return Err(DecodeError::UnknownShape("expected a JSON object".into()));
    };

    match object.get("status").and_then(Value::as_str) {
        Some("error") => {
            let message = object
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| object.get("error").and_then(Value::as_str))
                .unwrap_or(DEFAULT_ERROR_MESSAGE);
            return Ok(StreamEvent::Error {
                message: message.to_string(),
            });
        }
        // Structured form of the completion sentinel.
        Some("completed")
            if object.get("type").and_then(Value::as_str) == Some("status")
                && !object.contains_key("content") =>
        {
            return Ok(StreamEvent::Completed);
        }
        _ => {}
    }

    let wire: WireMessage =
        serde_json::from_value(value).map_err(|e| DecodeError::UnknownShape(e.to_string()))?;
    Ok(StreamEvent::Message(StreamMessage {
        message_id: wire.message_id,
        thread_id: wire.thread_id.map(ThreadId::new),
        kind: wire.kind,
        is_llm_message: wire.is_llm_message.unwrap_or(false),
        content: decode_nested(wire.content),
        metadata: decode_nested(wire.metadata),
        created_at: wire.created_at,
        updated_at: wire.updated_at,
        sequence: wire.sequence,
    }))
}

fn decode_nested(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => empty_object(),
        },
        _ => empty_object(),
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_line(kind: &str, content: Value, metadata: Value) -> String {
        json!({
            "message_id": "m-1",
            "thread_id": "t-1",
            "type": kind,
            "is_llm_message": true,
            "content": content.to_string(),
            "metadata": metadata.to_string(),
            "created_at": "2024-05-01T00:00:00Z",
            "updated_at": "2024-05-01T00:00:00Z",
            "sequence": 4
        })
        .to_string()
    }

    fn decode_message(line: &str) -> StreamMessage {
        match decode_line(line).expect("decode").expect("event") {
            StreamEvent::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_prefix_only_lines_produce_no_event() {
        assert_eq!(decode_line(""), Ok(None));
        assert_eq!(decode_line("   \r"), Ok(None));
        assert_eq!(decode_line("data: "), Ok(None));
    }

    #[test]
    fn completion_sentinels_skip_json_parsing() {
        let spaced = r#"data: {"type": "status", "status": "completed", "message": "Agent run completed successfully"}"#;
        assert_eq!(decode_line(spaced), Ok(Some(StreamEvent::Completed)));
        assert_eq!(
            decode_line("Stream ended with status: completed"),
            Ok(Some(StreamEvent::Completed))
        );
        assert_eq!(
            decode_line("data: Run data not available for streaming (run-9)"),
            Ok(Some(StreamEvent::Completed))
        );
    }

    #[test]
    fn structured_completed_status_is_completion() {
        let line = r#"{"type":"status","status":"completed","message":"done early"}"#;
        assert_eq!(decode_line(line), Ok(Some(StreamEvent::Completed)));
    }

    #[test]
    fn error_status_object_is_terminal_error() {
        let line = r#"data: {"status":"error","message":"Agent run crashed"}"#;
        assert_eq!(
            decode_line(line),
            Ok(Some(StreamEvent::Error {
                message: "Agent run crashed".into()
            }))
        );
        assert_eq!(
            decode_line(r#"{"status":"error"}"#),
            Ok(Some(StreamEvent::Error {
                message: DEFAULT_ERROR_MESSAGE.into()
            }))
        );
    }

    #[test]
    fn malformed_lines_are_decode_errors() {
        assert!(matches!(
            decode_line("data: {not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_line(r#"{"type":"mystery","content":"{}"}"#),
            Err(DecodeError::UnknownShape(_))
        ));
        assert!(matches!(
            decode_line("[1,2,3]"),
            Err(DecodeError::UnknownShape(_))
        ));
    }

    #[test]
    fn assistant_chunk_decodes_nested_payloads() {
        let line = message_line(
            "assistant",
            json!({"role": "assistant", "content": "Hello"}),
            json!({"stream_status": "chunk"}),
        );
        let message = decode_message(&format!("data: {line}"));
        assert_eq!(message.kind, MessageKind::Assistant);
        assert_eq!(message.stream_status(), Some(ChunkStatus::Chunk));
        assert_eq!(message.assistant_text().as_deref(), Some("Hello"));
        assert_eq!(message.sequence, Some(4));
        assert_eq!(message.thread_id, Some(ThreadId::new("t-1")));
    }

    #[test]
    fn unparseable_nested_payloads_default_to_empty_objects() {
        let line = json!({
            "type": "assistant",
            "content": "plain text, not json",
            "metadata": "{broken"
        })
        .to_string();
        let message = decode_message(&line);
        assert_eq!(message.content, json!({}));
        assert_eq!(message.metadata, json!({}));
        assert_eq!(message.stream_status(), None);
        assert_eq!(message.message_id, None);
    }

    #[test]
    fn status_content_exposes_tool_lifecycle_fields() {
        let line = message_line(
            "status",
            json!({
                "status_type": "tool_started",
                "function_name": "web_search",
                "arguments": {"query": "rust"},
                "xml_tag_name": "web-search",
                "tool_index": 2
            }),
            json!({}),
        );
        let status = decode_message(&line).status_content().expect("status");
        assert_eq!(status.status_type, Some(StatusType::ToolStarted));
        assert_eq!(status.function_name.as_deref(), Some("web_search"));
        assert_eq!(status.tool_index, Some(2));
        assert_eq!(status.arguments, Some(json!({"query": "rust"})));
    }

    #[test]
    fn unknown_status_type_decodes_to_other() {
        let line = message_line("status", json!({"status_type": "heartbeat"}), json!({}));
        let status = decode_message(&line).status_content().expect("status");
        assert_eq!(status.status_type, Some(StatusType::Other));
    }

    #[test]
    fn finalized_message_requires_an_id() {
        let line = message_line("tool", json!({"result": "ok"}), json!({}));
        let message = decode_message(&line);
        let finalized = FinalizedMessage::from_message(message.clone()).expect("has id");
        assert_eq!(finalized.message_id(), "m-1");

        let mut without_id = message;
        without_id.message_id = None;
        assert!(FinalizedMessage::from_message(without_id).is_none());
    }
}
