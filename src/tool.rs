//! Tool trait and call-site context binding.
//!
//! Tools never receive call-site state through the model backend. The
//! orchestrator binds each declared tool to the current call before the
//! loop starts; context-accepting tools get `(scope, user_id, thread_id,
//! message_id)` injected by the wrapper.

use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Host capability scope of the current call.
///
/// `Query` is read-only, `Mutation` may write storage, `Action` may perform
/// external I/O. Operations that need a wider scope than the call has fail
/// with [`AgentError::Unsupported`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Query,
    #[default]
    Mutation,
    Action,
}

impl Scope {
    /// Whether this scope may perform external I/O.
    pub fn is_action(&self) -> bool {
        matches!(self, Scope::Action)
    }
}

/// Call-site context injected into context-accepting tools.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub scope: Scope,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    /// Id of the prompt message the current generation runs under.
    pub message_id: Option<String>,
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

/// Tool metadata offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool id; the name the model calls.
    pub id: String,
    pub description: String,
    /// JSON schema for the arguments.
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// A named, schema-validated callable the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Whether execution requires the injected call-site context.
    fn needs_ctx(&self) -> bool {
        false
    }

    /// Execute the tool. `ctx` is `Some` only for context-accepting tools
    /// invoked through a bound wrapper.
    async fn execute(&self, args: Value, ctx: Option<&ToolCtx>) -> Result<Value, ToolError>;
}

/// A set of declared tools keyed by id.
pub type ToolMap = HashMap<String, Arc<dyn Tool>>;

/// Build a tool map from an iterator of tools.
pub fn tool_map<I, T>(tools: I) -> ToolMap
where
    I: IntoIterator<Item = T>,
    T: Tool + 'static,
{
    tools
        .into_iter()
        .map(|t| {
            let id = t.descriptor().id;
            (id, Arc::new(t) as Arc<dyn Tool>)
        })
        .collect()
}

/// Pick the tool set for a call: call-site tools, else thread defaults,
/// else agent defaults. Sources never merge.
pub fn resolve_tools<'a>(
    call_site: Option<&'a ToolMap>,
    thread: Option<&'a ToolMap>,
    agent: Option<&'a ToolMap>,
) -> Option<&'a ToolMap> {
    call_site.or(thread).or(agent)
}

/// A tool bound to one call's context.
#[derive(Clone)]
pub struct BoundTool {
    inner: Arc<dyn Tool>,
    ctx: Option<Arc<ToolCtx>>,
}

impl BoundTool {
    pub fn descriptor(&self) -> ToolDescriptor {
        self.inner.descriptor()
    }

    /// Invoke the tool, forwarding the bound context to tools that asked
    /// for it.
    ///
    /// A context-accepting tool invoked without a bound context is a
    /// [`AgentError::Misuse`]. A tool's own execution failure surfaces as a
    /// provider-path error and fails the enclosing generation.
    pub async fn invoke(&self, args: Value) -> Result<Value, AgentError> {
        let name = self.inner.descriptor().id;
        if self.inner.needs_ctx() {
            let ctx = self.ctx.as_deref().ok_or_else(|| {
                AgentError::Misuse(format!(
                    "tool {name} requires call-site context but none was bound"
                ))
            })?;
            self.inner
                .execute(args, Some(ctx))
                .await
                .map_err(|e| AgentError::Provider(format!("tool {name} failed: {e}")))
        } else {
            self.inner
                .execute(args, None)
                .await
                .map_err(|e| AgentError::Provider(format!("tool {name} failed: {e}")))
        }
    }
}

/// Bind a tool set to one call's context.
///
/// Plain tools pass through unchanged; context-accepting tools get a
/// shallow wrapper closing over `ctx`.
pub fn bind_tools(tools: &ToolMap, ctx: ToolCtx) -> HashMap<String, BoundTool> {
    let ctx = Arc::new(ctx);
    tools
        .iter()
        .map(|(id, tool)| {
            let bound = BoundTool {
                inner: tool.clone(),
                ctx: tool.needs_ctx().then(|| ctx.clone()),
            };
            (id.clone(), bound)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PlainTool;

    #[async_trait]
    impl Tool for PlainTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("plain", "a plain tool")
        }

        async fn execute(&self, _args: Value, ctx: Option<&ToolCtx>) -> Result<Value, ToolError> {
            assert!(ctx.is_none());
            Ok(json!({"ok": true}))
        }
    }

    struct CtxTool;

    #[async_trait]
    impl Tool for CtxTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("ctx", "a context-accepting tool")
        }

        fn needs_ctx(&self) -> bool {
            true
        }

        async fn execute(&self, _args: Value, ctx: Option<&ToolCtx>) -> Result<Value, ToolError> {
            let ctx = ctx.ok_or_else(|| ToolError::ExecutionFailed("no ctx".into()))?;
            Ok(json!({
                "user_id": ctx.user_id,
                "thread_id": ctx.thread_id,
                "message_id": ctx.message_id,
            }))
        }
    }

    fn ctx() -> ToolCtx {
        ToolCtx {
            scope: Scope::Action,
            user_id: Some("u1".into()),
            thread_id: Some("t1".into()),
            message_id: Some("m1".into()),
        }
    }

    #[tokio::test]
    async fn test_plain_tool_passes_through() {
        let tools = tool_map([PlainTool]);
        let bound = bind_tools(&tools, ctx());
        let out = bound["plain"].invoke(json!({})).await.unwrap();
        assert_eq!(out["ok"], true);
    }

    #[tokio::test]
    async fn test_ctx_tool_receives_injected_context() {
        let tools = tool_map([CtxTool]);
        let bound = bind_tools(&tools, ctx());
        let out = bound["ctx"].invoke(json!({})).await.unwrap();
        assert_eq!(out["user_id"], "u1");
        assert_eq!(out["thread_id"], "t1");
        assert_eq!(out["message_id"], "m1");
    }

    #[tokio::test]
    async fn test_ctx_tool_without_binding_is_misuse() {
        let unbound = BoundTool {
            inner: Arc::new(CtxTool),
            ctx: None,
        };
        let err = unbound.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Misuse(_)));
    }

    #[test]
    fn test_resolve_tools_priority() {
        let call_site = tool_map([PlainTool]);
        let agent = tool_map([CtxTool]);

        let picked = resolve_tools(Some(&call_site), None, Some(&agent)).unwrap();
        assert!(picked.contains_key("plain"));

        let picked = resolve_tools(None, None, Some(&agent)).unwrap();
        assert!(picked.contains_key("ctx"));

        assert!(resolve_tools(None, None, None).is_none());
    }

    #[test]
    fn test_resolve_tools_never_merges() {
        let call_site = tool_map([PlainTool]);
        let thread = tool_map([CtxTool]);
        let picked = resolve_tools(Some(&call_site), Some(&thread), None).unwrap();
        assert_eq!(picked.len(), 1);
        assert!(!picked.contains_key("ctx"));
    }
}
