//! Core types for threads, messages and generation steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in its provider-facing form, tagged by role.
///
/// Assistant content is either a plain string or a list of parts; tool
/// content is a list of tool results. The serde form is the wire form —
/// `serialize_message` / `deserialize_message` in [`crate::convert`] are
/// lossless for every shape here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum CoreMessage {
    System { content: String },
    User { content: String },
    Assistant { content: AssistantContent },
    Tool { content: Vec<ToolResultPart> },
}

/// Assistant message content: a bare string or structured parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssistantContent {
    Text(String),
    Parts(Vec<AssistantPart>),
}

/// One part of a structured assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AssistantPart {
    Text {
        text: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: Value,
    },
    Reasoning {
        text: String,
    },
    Source {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    File {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// One tool result inside a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Value,
}

impl CoreMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Create a plain-text assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: AssistantContent::Text(content.into()),
        }
    }

    /// Create an assistant message from structured parts.
    pub fn assistant_parts(parts: Vec<AssistantPart>) -> Self {
        Self::Assistant {
            content: AssistantContent::Parts(parts),
        }
    }

    /// Create a tool message from tool results.
    pub fn tool_results(results: Vec<ToolResultPart>) -> Self {
        Self::Tool { content: results }
    }

    /// The message role.
    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    /// Extract the searchable text of this message.
    ///
    /// Tool messages yield the empty string; structured assistant content
    /// yields its text parts joined by newlines.
    pub fn extracted_text(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } => content.clone(),
            Self::Assistant { content } => match content {
                AssistantContent::Text(text) => text.clone(),
                AssistantContent::Parts(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        AssistantPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            Self::Tool { .. } => String::new(),
        }
    }

    /// Whether this message participates in a tool exchange: a tool message,
    /// or an assistant message carrying tool-call parts.
    pub fn is_tool(&self) -> bool {
        match self {
            Self::Tool { .. } => true,
            Self::Assistant {
                content: AssistantContent::Parts(parts),
            } => parts
                .iter()
                .any(|p| matches!(p, AssistantPart::ToolCall { .. })),
            _ => false,
        }
    }

    /// Tool-call ids announced by an assistant message.
    pub fn tool_call_ids(&self) -> Vec<&str> {
        match self {
            Self::Assistant {
                content: AssistantContent::Parts(parts),
            } => parts
                .iter()
                .filter_map(|p| match p {
                    AssistantPart::ToolCall { tool_call_id, .. } => Some(tool_call_id.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Tool-call ids answered by a tool message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match self {
            Self::Tool { content } => content.iter().map(|r| r.tool_call_id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Lifecycle status of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Written speculatively before the generation completed.
    Pending,
    /// Committed.
    Success,
    /// Rolled back; `error` on the doc records why.
    Failed,
}

/// A conversation thread, optionally owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDoc {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Creation timestamp (unix millis).
    pub created_at: u64,
}

/// A stored message row.
///
/// `order` groups all messages of one prompt→response transaction;
/// `step_order` sequences messages within that group. Together they form a
/// strict total order within the thread. A doc is created as `pending` or
/// `success`, mutated only by commit (`pending → success`) or rollback
/// (`pending → failed`), and never re-embedded after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDoc {
    pub id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub order: u64,
    pub step_order: u64,
    pub status: MessageStatus,
    pub message: CoreMessage,
    /// Extracted text, denormalized for search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// True iff the message's role is tool or the assistant message contains
    /// tool calls.
    pub tool: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Caller-supplied metadata attached at save time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Token usage reported by the model for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Error,
    Unknown,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// One iteration of the LLM loop: text, the tool calls it requested, and
/// their results, with usage and attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_results: Vec<ToolResultPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
    pub provider: String,
    pub model: String,
}

/// Generate a time-ordered UUID v7 identifier.
pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_tagged_serialization() {
        let msg = CoreMessage::user("Hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"content\":\"Hi\""));
    }

    #[test]
    fn test_assistant_string_content_roundtrip() {
        let msg = CoreMessage::assistant("Hello!");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: CoreMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_assistant_parts_roundtrip() {
        let msg = CoreMessage::assistant_parts(vec![
            AssistantPart::Text {
                text: "Let me check".into(),
            },
            AssistantPart::ToolCall {
                tool_call_id: "call_1".into(),
                tool_name: "search".into(),
                args: json!({"q": "rust"}),
            },
            AssistantPart::Reasoning {
                text: "the user wants docs".into(),
            },
        ]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"tool-call\""));
        assert!(json.contains("\"toolCallId\":\"call_1\""));
        let parsed: CoreMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_tool_message_roundtrip() {
        let msg = CoreMessage::tool_results(vec![ToolResultPart {
            tool_call_id: "call_1".into(),
            tool_name: "search".into(),
            result: json!({"hits": 3}),
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: CoreMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_extracted_text() {
        assert_eq!(CoreMessage::user("hi").extracted_text(), "hi");
        assert_eq!(
            CoreMessage::assistant_parts(vec![
                AssistantPart::Text { text: "a".into() },
                AssistantPart::Reasoning { text: "x".into() },
                AssistantPart::Text { text: "b".into() },
            ])
            .extracted_text(),
            "a\nb"
        );
        assert_eq!(
            CoreMessage::tool_results(vec![ToolResultPart {
                tool_call_id: "c".into(),
                tool_name: "t".into(),
                result: json!("out"),
            }])
            .extracted_text(),
            ""
        );
    }

    #[test]
    fn test_is_tool() {
        assert!(!CoreMessage::user("hi").is_tool());
        assert!(!CoreMessage::assistant("hi").is_tool());
        assert!(CoreMessage::tool_results(vec![]).is_tool());
        assert!(CoreMessage::assistant_parts(vec![AssistantPart::ToolCall {
            tool_call_id: "c1".into(),
            tool_name: "t".into(),
            args: json!({}),
        }])
        .is_tool());
        assert!(
            !CoreMessage::assistant_parts(vec![AssistantPart::Text { text: "x".into() }]).is_tool()
        );
    }

    #[test]
    fn test_tool_call_and_result_ids() {
        let assistant = CoreMessage::assistant_parts(vec![
            AssistantPart::ToolCall {
                tool_call_id: "a".into(),
                tool_name: "t".into(),
                args: json!({}),
            },
            AssistantPart::ToolCall {
                tool_call_id: "b".into(),
                tool_name: "t".into(),
                args: json!({}),
            },
        ]);
        assert_eq!(assistant.tool_call_ids(), vec!["a", "b"]);
        assert!(assistant.tool_result_ids().is_empty());

        let tool = CoreMessage::tool_results(vec![ToolResultPart {
            tool_call_id: "a".into(),
            tool_name: "t".into(),
            result: json!(null),
        }]);
        assert_eq!(tool.tool_result_ids(), vec!["a"]);
        assert!(tool.tool_call_ids().is_empty());
    }

    #[test]
    fn test_new_id_is_uuid_v7() {
        let id = new_id();
        assert_eq!(id.len(), 36);
        assert_eq!(&id[14..15], "7");
        assert_ne!(id, new_id());
    }

    #[test]
    fn test_message_doc_serialization_skips_empty_options() {
        let doc = MessageDoc {
            id: "m1".into(),
            thread_id: "t1".into(),
            user_id: None,
            agent_name: None,
            order: 0,
            step_order: 0,
            status: MessageStatus::Pending,
            message: CoreMessage::user("hi"),
            text: Some("hi".into()),
            tool: false,
            embedding_id: None,
            error: None,
            provider: None,
            model: None,
            metadata: None,
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("error"));
        assert!(!json.contains("agent_name"));
    }

    #[test]
    fn test_finish_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool-calls\""
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::Stop).unwrap(),
            "\"stop\""
        );
    }
}
