//! Host endpoint adapters.
//!
//! Workflow hosts dispatch by name with JSON arguments; these adapters
//! bridge the agent's operations into that shape. Argument structs are the
//! public schema; beyond validating and merging options they add no logic.

use crate::agent::{Agent, CallArgs};
use crate::context::ContextOptions;
use crate::error::AgentError;
use crate::persistence::{save_messages, SaveMessagesArgs, StorageOptions};
use crate::storage::{CreateThreadArgs, MessageStore};
use crate::provider::EmbeddingModel;
use crate::tool::Scope;
use crate::types::CoreMessage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| AgentError::InvalidArgument(e.to_string()))
}

/// Overrides baked into an action at registration time.
#[derive(Debug, Clone, Default)]
pub struct ActionSpec {
    pub max_steps: Option<usize>,
    pub context_options: Option<ContextOptions>,
    pub storage_options: Option<StorageOptions>,
}

/// Wire arguments accepted by the generation endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEndpointArgs {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub prompt: Option<String>,
    pub messages: Option<Vec<CoreMessage>>,
    pub prompt_message_id: Option<String>,
}

impl GenerateEndpointArgs {
    fn into_call_args(self, spec: &ActionSpec) -> CallArgs {
        CallArgs {
            user_id: self.user_id,
            thread_id: self.thread_id,
            prompt: self.prompt,
            messages: self.messages,
            prompt_message_id: self.prompt_message_id,
            max_steps: spec.max_steps,
            context_options: spec.context_options.clone(),
            storage_options: spec.storage_options,
            scope: Scope::Action,
            ..Default::default()
        }
    }
}

/// Text generation exposed as a host action.
pub struct TextAction {
    agent: Agent,
    spec: ActionSpec,
}

impl TextAction {
    pub async fn call(&self, args: Value) -> Result<Value, AgentError> {
        let args: GenerateEndpointArgs = parse_args(args)?;
        let result = self.agent.generate_text(args.into_call_args(&self.spec)).await?;
        Ok(json!({ "text": result.text, "messageId": result.message_id }))
    }
}

/// Object generation exposed as a host action.
pub struct ObjectAction {
    agent: Agent,
    spec: ActionSpec,
    schema: Value,
}

impl ObjectAction {
    pub async fn call(&self, args: Value) -> Result<Value, AgentError> {
        let args: GenerateEndpointArgs = parse_args(args)?;
        let result = self
            .agent
            .generate_object(args.into_call_args(&self.spec), self.schema.clone())
            .await?;
        Ok(json!({ "object": result.object }))
    }
}

/// Wire arguments for the create-thread endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadEndpointArgs {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Thread creation exposed as a host mutation.
pub struct CreateThreadMutation {
    store: Arc<dyn MessageStore>,
}

impl CreateThreadMutation {
    pub async fn call(&self, args: Value) -> Result<Value, AgentError> {
        let args: CreateThreadEndpointArgs = parse_args(args)?;
        let thread = self
            .store
            .create_thread(CreateThreadArgs {
                user_id: args.user_id,
                title: args.title,
                summary: args.summary,
            })
            .await?;
        serde_json::to_value(&thread).map_err(|e| AgentError::InvalidArgument(e.to_string()))
    }
}

/// Wire arguments for the save-messages endpoint (message with metadata).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessagesEndpointArgs {
    pub thread_id: String,
    pub user_id: Option<String>,
    pub messages: Vec<CoreMessage>,
    pub metadata: Option<Vec<Value>>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub fail_pending_steps: bool,
}

/// Message saving exposed as a host mutation.
pub struct SaveMessagesMutation {
    store: Arc<dyn MessageStore>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    agent_name: String,
}

impl SaveMessagesMutation {
    pub async fn call(&self, args: Value) -> Result<Value, AgentError> {
        let args: SaveMessagesEndpointArgs = parse_args(args)?;
        let saved = save_messages(
            self.store.as_ref(),
            self.embedder.as_deref(),
            SaveMessagesArgs {
                thread_id: args.thread_id,
                user_id: args.user_id,
                agent_name: Some(self.agent_name.clone()),
                messages: args.messages,
                metadata: args.metadata,
                pending: args.pending,
                fail_pending_steps: args.fail_pending_steps,
                ..Default::default()
            },
        )
        .await?;
        Ok(json!({
            "lastMessageId": saved.last_message_id,
            "messageIds": saved.message_ids,
        }))
    }
}

impl Agent {
    /// Expose text generation as a named host action.
    pub fn as_text_action(&self, spec: ActionSpec) -> TextAction {
        TextAction {
            agent: self.clone(),
            spec,
        }
    }

    /// Expose object generation as a named host action.
    pub fn as_object_action(&self, spec: ActionSpec, schema: Value) -> ObjectAction {
        ObjectAction {
            agent: self.clone(),
            spec,
            schema,
        }
    }

    /// Expose thread creation as a named host mutation.
    pub fn as_create_thread_mutation(&self) -> CreateThreadMutation {
        CreateThreadMutation {
            store: self.store_handle(),
        }
    }

    /// Expose message saving as a named host mutation.
    pub fn as_save_messages_mutation(&self) -> SaveMessagesMutation {
        SaveMessagesMutation {
            store: self.store_handle(),
            embedder: self.embedder_handle(),
            agent_name: self.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LanguageModel, ModelRequest, ModelStream, StepResponse};
    use crate::storage::MemoryStore;
    use crate::types::FinishReason;
    use async_trait::async_trait;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn provider(&self) -> &str {
            "mock"
        }

        fn model_id(&self) -> &str {
            "echo-1"
        }

        async fn complete(&self, request: ModelRequest) -> Result<StepResponse, AgentError> {
            let text = if request.response_format.is_some() {
                r#"{"echo": true}"#.to_string()
            } else {
                format!(
                    "echo: {}",
                    request
                        .messages
                        .last()
                        .map(|m| m.extracted_text())
                        .unwrap_or_default()
                )
            };
            Ok(StepResponse {
                text,
                tool_calls: vec![],
                usage: None,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn stream(&self, _request: ModelRequest) -> Result<ModelStream, AgentError> {
            unimplemented!("not exercised by endpoint tests")
        }
    }

    fn agent(store: Arc<MemoryStore>) -> Agent {
        Agent::new("endpoint-agent", Arc::new(EchoModel), store)
    }

    #[tokio::test]
    async fn test_create_thread_mutation_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let mutation = agent(store).as_create_thread_mutation();
        let thread = mutation
            .call(json!({"userId": "u1", "title": "Support"}))
            .await
            .unwrap();
        assert_eq!(thread["user_id"], "u1");
        assert_eq!(thread["title"], "Support");
        assert!(thread["id"].is_string());
    }

    #[tokio::test]
    async fn test_save_messages_mutation_returns_ids() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store.clone());
        let thread = store
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();

        let out = agent
            .as_save_messages_mutation()
            .call(json!({
                "threadId": thread.id,
                "messages": [{"role": "user", "content": "hello"}],
            }))
            .await
            .unwrap();
        assert_eq!(out["messageIds"].as_array().unwrap().len(), 1);
        assert_eq!(out["lastMessageId"], out["messageIds"][0]);
    }

    #[tokio::test]
    async fn test_text_action_generates() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store.clone());
        let thread = store
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();

        let out = agent
            .as_text_action(ActionSpec::default())
            .call(json!({"threadId": thread.id, "prompt": "ping"}))
            .await
            .unwrap();
        assert_eq!(out["text"], "echo: ping");
        assert!(out["messageId"].is_string());
    }

    #[tokio::test]
    async fn test_object_action_generates() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store.clone());
        let thread = store
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();

        let out = agent
            .as_object_action(ActionSpec::default(), json!({"type": "object"}))
            .call(json!({"threadId": thread.id, "prompt": "ping"}))
            .await
            .unwrap();
        assert_eq!(out["object"]["echo"], true);
    }

    #[tokio::test]
    async fn test_malformed_args_are_invalid_argument() {
        let store = Arc::new(MemoryStore::new());
        let err = agent(store)
            .as_text_action(ActionSpec::default())
            .call(json!({"messages": "not-a-list"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }
}
