//! Message mapper: wire serialization, prompt normalization, step
//! splitting, and UI projection of stored docs.

use crate::error::AgentError;
use crate::types::{
    AssistantContent, AssistantPart, CoreMessage, FinishReason, MessageDoc, Role, Step,
    ToolResultPart, Usage,
};
use serde_json::Value;
use tracing::warn;

/// Serialize a message to its wire form.
pub fn serialize_message(message: &CoreMessage) -> Value {
    // CoreMessage's serde form is the wire form; this cannot fail.
    serde_json::to_value(message).unwrap_or(Value::Null)
}

/// Deserialize a message from its wire form.
pub fn deserialize_message(wire: &Value) -> Result<CoreMessage, AgentError> {
    serde_json::from_value(wire.clone())
        .map_err(|e| AgentError::InvalidArgument(format!("malformed wire message: {e}")))
}

/// Normalize a `prompt` / `messages` pair into a message list.
///
/// Supplying both is an error. Supplying neither yields an empty list — the
/// caller is expected to drive the generation from a `prompt_message_id`.
pub fn prompt_or_messages(
    prompt: Option<String>,
    messages: Option<Vec<CoreMessage>>,
) -> Result<Vec<CoreMessage>, AgentError> {
    match (prompt, messages) {
        (Some(_), Some(_)) => Err(AgentError::InvalidArgument(
            "specify only one of prompt or messages".into(),
        )),
        (Some(prompt), None) => Ok(vec![CoreMessage::user(prompt)]),
        (None, Some(messages)) => Ok(messages),
        (None, None) => Ok(Vec::new()),
    }
}

/// Serialize a completed step for storage.
pub fn serialize_step(step: &Step) -> Value {
    serde_json::to_value(step).unwrap_or(Value::Null)
}

/// The new messages a completed step produced, in emission order: the
/// assistant message, then (when any tool ran) the tool message with its
/// results. The prompt is never echoed back.
pub fn new_messages_in_step(step: &Step) -> Vec<CoreMessage> {
    let mut messages = Vec::with_capacity(2);

    let assistant = if step.tool_calls.is_empty() && step.reasoning.is_none() {
        CoreMessage::assistant(step.text.clone())
    } else {
        let mut parts = Vec::new();
        if let Some(ref reasoning) = step.reasoning {
            parts.push(AssistantPart::Reasoning {
                text: reasoning.clone(),
            });
        }
        if !step.text.is_empty() {
            parts.push(AssistantPart::Text {
                text: step.text.clone(),
            });
        }
        for call in &step.tool_calls {
            parts.push(AssistantPart::ToolCall {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                args: call.args.clone(),
            });
        }
        CoreMessage::assistant_parts(parts)
    };
    messages.push(assistant);

    if !step.tool_results.is_empty() {
        messages.push(CoreMessage::tool_results(step.tool_results.clone()));
    }

    messages
}

/// Synthesize a step from a non-streaming object generation so persistence
/// treats it uniformly with text steps.
///
/// The step metadata is synthesized: `finish_reason` is always `stop` and
/// there are no tool calls or logprobs, regardless of what the backend
/// actually reported.
pub fn object_result_step(
    object: &Value,
    usage: Option<Usage>,
    provider: impl Into<String>,
    model: impl Into<String>,
) -> Step {
    Step {
        text: object.to_string(),
        reasoning: None,
        tool_calls: Vec::new(),
        tool_results: Vec::new(),
        usage,
        finish_reason: FinishReason::Stop,
        provider: provider.into(),
        model: model.into(),
    }
}

// ============================================================================
// UI projection
// ============================================================================

/// Role of a UI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    System,
    User,
    Assistant,
}

/// Lifecycle of a tool invocation as seen by a UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolInvocationState {
    Call,
    Result,
}

/// One part of a UI message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
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
    StepStart,
    ToolInvocation {
        state: ToolInvocationState,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

/// A stored message projected for display: a run of consecutive
/// assistant/tool docs collapses into one assistant message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: UiRole,
    pub status: crate::types::MessageStatus,
    pub order: u64,
    /// Concatenated text of all text parts.
    pub text: String,
    pub parts: Vec<UiPart>,
}

/// Project stored docs into UI messages.
///
/// Consecutive assistant and tool docs are merged into a single assistant
/// message; each assistant doc after the first contributes a `step-start`
/// part. A tool result with no preceding call is appended directly in
/// `result` state.
pub fn to_ui_messages(docs: &[MessageDoc]) -> Vec<UiMessage> {
    let mut out: Vec<UiMessage> = Vec::new();
    let mut assistant_run: Option<UiMessage> = None;

    for doc in docs {
        match doc.message.role() {
            Role::System | Role::User => {
                if let Some(run) = assistant_run.take() {
                    out.push(run);
                }
                out.push(UiMessage {
                    id: doc.id.clone(),
                    role: if doc.message.role() == Role::System {
                        UiRole::System
                    } else {
                        UiRole::User
                    },
                    status: doc.status,
                    order: doc.order,
                    text: doc.message.extracted_text(),
                    parts: vec![UiPart::Text {
                        text: doc.message.extracted_text(),
                    }],
                });
            }
            Role::Assistant => {
                let run = assistant_run.get_or_insert_with(|| UiMessage {
                    id: doc.id.clone(),
                    role: UiRole::Assistant,
                    status: doc.status,
                    order: doc.order,
                    text: String::new(),
                    parts: Vec::new(),
                });
                if !run.parts.is_empty() {
                    run.parts.push(UiPart::StepStart);
                }
                append_assistant_parts(run, &doc.message);
            }
            Role::Tool => {
                let run = assistant_run.get_or_insert_with(|| UiMessage {
                    id: doc.id.clone(),
                    role: UiRole::Assistant,
                    status: doc.status,
                    order: doc.order,
                    text: String::new(),
                    parts: Vec::new(),
                });
                if let CoreMessage::Tool { content } = &doc.message {
                    for result in content {
                        resolve_tool_result(run, result);
                    }
                }
            }
        }
    }

    if let Some(run) = assistant_run.take() {
        out.push(run);
    }
    out
}

fn append_assistant_parts(run: &mut UiMessage, message: &CoreMessage) {
    let CoreMessage::Assistant { content } = message else {
        return;
    };
    match content {
        AssistantContent::Text(text) => {
            if !text.is_empty() {
                run.text.push_str(text);
                run.parts.push(UiPart::Text { text: text.clone() });
            }
        }
        AssistantContent::Parts(parts) => {
            for part in parts {
                match part {
                    AssistantPart::Text { text } => {
                        run.text.push_str(text);
                        run.parts.push(UiPart::Text { text: text.clone() });
                    }
                    AssistantPart::Reasoning { text } => {
                        run.parts.push(UiPart::Reasoning { text: text.clone() });
                    }
                    AssistantPart::Source { url, title } => {
                        run.parts.push(UiPart::Source {
                            url: url.clone(),
                            title: title.clone(),
                        });
                    }
                    AssistantPart::File { data, mime_type } => {
                        run.parts.push(UiPart::File {
                            data: data.clone(),
                            mime_type: mime_type.clone(),
                        });
                    }
                    AssistantPart::ToolCall {
                        tool_call_id,
                        tool_name,
                        args,
                    } => {
                        run.parts.push(UiPart::ToolInvocation {
                            state: ToolInvocationState::Call,
                            tool_call_id: tool_call_id.clone(),
                            tool_name: tool_name.clone(),
                            args: args.clone(),
                            result: None,
                        });
                    }
                }
            }
        }
    }
}

/// Upgrade the matching `call` invocation to `result`, or append an orphan
/// result with a warning.
fn resolve_tool_result(run: &mut UiMessage, tool_result: &ToolResultPart) {
    for part in run.parts.iter_mut().rev() {
        if let UiPart::ToolInvocation {
            state,
            tool_call_id,
            result,
            ..
        } = part
        {
            if *state == ToolInvocationState::Call && tool_call_id == &tool_result.tool_call_id {
                *state = ToolInvocationState::Result;
                *result = Some(tool_result.result.clone());
                return;
            }
        }
    }
    warn!(
        tool_call_id = %tool_result.tool_call_id,
        "tool result without a matching tool call"
    );
    run.parts.push(UiPart::ToolInvocation {
        state: ToolInvocationState::Result,
        tool_call_id: tool_result.tool_call_id.clone(),
        tool_name: tool_result.tool_name.clone(),
        args: Value::Null,
        result: Some(tool_result.result.clone()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageStatus, ToolCallRequest};
    use serde_json::json;

    fn doc(order: u64, step_order: u64, message: CoreMessage) -> MessageDoc {
        MessageDoc {
            id: format!("m{order}-{step_order}"),
            thread_id: "t1".into(),
            user_id: None,
            agent_name: None,
            order,
            step_order,
            status: MessageStatus::Success,
            text: Some(message.extracted_text()),
            tool: message.is_tool(),
            message,
            embedding_id: None,
            error: None,
            provider: None,
            model: None,
            metadata: None,
        }
    }

    // ========================================================================
    // Wire round-trips
    // ========================================================================

    #[test]
    fn test_roundtrip_every_message_shape() {
        let shapes = vec![
            CoreMessage::system("be helpful"),
            CoreMessage::user("hi"),
            CoreMessage::assistant("hello"),
            CoreMessage::assistant_parts(vec![
                AssistantPart::Text { text: "t".into() },
                AssistantPart::ToolCall {
                    tool_call_id: "c1".into(),
                    tool_name: "search".into(),
                    args: json!({"q": 1}),
                },
                AssistantPart::Reasoning { text: "r".into() },
                AssistantPart::Source {
                    url: "https://example.com".into(),
                    title: Some("Example".into()),
                },
                AssistantPart::File {
                    data: "aGk=".into(),
                    mime_type: "text/plain".into(),
                },
            ]),
            CoreMessage::tool_results(vec![ToolResultPart {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                result: json!([1, 2]),
            }]),
        ];
        for shape in shapes {
            let wire = serialize_message(&shape);
            let back = deserialize_message(&wire).unwrap();
            assert_eq!(back, shape);
        }
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let err = deserialize_message(&json!({"role": "narrator"})).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    // ========================================================================
    // prompt / messages normalization
    // ========================================================================

    #[test]
    fn test_prompt_or_messages_conflict() {
        let err = prompt_or_messages(Some("p".into()), Some(vec![CoreMessage::user("m")]));
        assert!(matches!(err, Err(AgentError::InvalidArgument(_))));
    }

    #[test]
    fn test_prompt_becomes_user_message() {
        let messages = prompt_or_messages(Some("Hi".into()), None).unwrap();
        assert_eq!(messages, vec![CoreMessage::user("Hi")]);
    }

    #[test]
    fn test_neither_yields_empty() {
        assert!(prompt_or_messages(None, None).unwrap().is_empty());
    }

    // ========================================================================
    // Step splitting
    // ========================================================================

    fn step_with(text: &str, calls: Vec<ToolCallRequest>, results: Vec<ToolResultPart>) -> Step {
        Step {
            text: text.into(),
            reasoning: None,
            tool_calls: calls,
            tool_results: results,
            usage: None,
            finish_reason: FinishReason::Stop,
            provider: "mock".into(),
            model: "mock-1".into(),
        }
    }

    #[test]
    fn test_plain_text_step_is_one_assistant_message() {
        let step = step_with("done", vec![], vec![]);
        let messages = new_messages_in_step(&step);
        assert_eq!(messages, vec![CoreMessage::assistant("done")]);
    }

    #[test]
    fn test_tool_step_yields_assistant_and_tool_messages() {
        let step = step_with(
            "checking",
            vec![ToolCallRequest::new("c1", "search", json!({"q": "x"}))],
            vec![ToolResultPart {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                result: json!({"hits": 0}),
            }],
        );
        let messages = new_messages_in_step(&step);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_call_ids(), vec!["c1"]);
        assert_eq!(messages[1].tool_result_ids(), vec!["c1"]);
    }

    #[test]
    fn test_object_result_step_is_synthesized() {
        let step = object_result_step(&json!({"name": "Ada"}), None, "mock", "mock-1");
        assert_eq!(step.finish_reason, FinishReason::Stop);
        assert!(step.tool_calls.is_empty());
        assert_eq!(step.text, r#"{"name":"Ada"}"#);
        let messages = new_messages_in_step(&step);
        assert_eq!(messages.len(), 1);
    }

    // ========================================================================
    // UI projection
    // ========================================================================

    #[test]
    fn test_user_and_assistant_docs_stay_separate() {
        let docs = vec![
            doc(0, 0, CoreMessage::user("hi")),
            doc(0, 1, CoreMessage::assistant("hello")),
        ];
        let ui = to_ui_messages(&docs);
        assert_eq!(ui.len(), 2);
        assert_eq!(ui[0].role, UiRole::User);
        assert_eq!(ui[1].role, UiRole::Assistant);
        assert_eq!(ui[1].text, "hello");
    }

    #[test]
    fn test_assistant_tool_run_collapses() {
        let docs = vec![
            doc(0, 0, CoreMessage::user("weather?")),
            doc(
                0,
                1,
                CoreMessage::assistant_parts(vec![AssistantPart::ToolCall {
                    tool_call_id: "c1".into(),
                    tool_name: "weather".into(),
                    args: json!({"city": "Oslo"}),
                }]),
            ),
            doc(
                0,
                2,
                CoreMessage::tool_results(vec![ToolResultPart {
                    tool_call_id: "c1".into(),
                    tool_name: "weather".into(),
                    result: json!({"temp": -3}),
                }]),
            ),
            doc(0, 3, CoreMessage::assistant("It is -3 in Oslo.")),
        ];
        let ui = to_ui_messages(&docs);
        assert_eq!(ui.len(), 2);
        let assistant = &ui[1];
        // tool-invocation (resolved), step-start, text
        assert_eq!(assistant.parts.len(), 3);
        match &assistant.parts[0] {
            UiPart::ToolInvocation { state, result, .. } => {
                assert_eq!(*state, ToolInvocationState::Result);
                assert_eq!(result.as_ref().unwrap()["temp"], -3);
            }
            other => panic!("expected tool invocation, got {other:?}"),
        }
        assert_eq!(assistant.parts[1], UiPart::StepStart);
        assert_eq!(assistant.text, "It is -3 in Oslo.");
    }

    #[test]
    fn test_orphan_tool_result_is_appended_in_result_state() {
        let docs = vec![doc(
            0,
            0,
            CoreMessage::tool_results(vec![ToolResultPart {
                tool_call_id: "ghost".into(),
                tool_name: "x".into(),
                result: json!(1),
            }]),
        )];
        let ui = to_ui_messages(&docs);
        assert_eq!(ui.len(), 1);
        match &ui[0].parts[0] {
            UiPart::ToolInvocation { state, args, .. } => {
                assert_eq!(*state, ToolInvocationState::Result);
                assert_eq!(*args, Value::Null);
            }
            other => panic!("expected tool invocation, got {other:?}"),
        }
    }
}
