//! Context retrieval: merge recent thread history with hybrid search,
//! de-duplicate, order, and drop orphaned tool messages.

use crate::embeddings::embed_query;
use crate::error::AgentError;
use crate::provider::EmbeddingModel;
use crate::storage::{
    ListMessagesArgs, MessageRange, MessageStore, SearchMessagesArgs, SortOrder,
};
use crate::tool::Scope;
use crate::types::{MessageDoc, MessageStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Search tuning for context retrieval. Unset fields fall back to the
/// defaults noted per field when the search runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of search hits. Default 10.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<bool>,
    /// Neighborhood kept around each hit, applied after `limit`.
    /// Default `{before: 2, after: 1}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_range: Option<MessageRange>,
}

impl SearchOptions {
    /// Shallow-merge: `over` wins field-wise.
    fn merged(base: Option<Self>, over: Option<Self>) -> Option<Self> {
        match (base, over) {
            (Some(base), Some(over)) => Some(Self {
                limit: over.limit.or(base.limit),
                text_search: over.text_search.or(base.text_search),
                vector_search: over.vector_search.or(base.vector_search),
                message_range: over.message_range.or(base.message_range),
            }),
            (base, over) => over.or(base),
        }
    }

    fn wants_search(&self) -> bool {
        self.text_search == Some(true) || self.vector_search == Some(true)
    }
}

/// Options controlling what prior history a generation sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    /// Size of the recent-history window. Default 100; `Some(0)` disables
    /// the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_messages: Option<usize>,
    /// Drop tool messages from the recent window. Default true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_tool_messages: Option<bool>,
    /// Legacy switch: `Some(true)` forces tool messages into the window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_options: Option<SearchOptions>,
    /// Scan the user's other threads too. Needs an action-scope call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_other_threads: Option<bool>,
}

impl ContextOptions {
    /// Merge call-site options over defaults. `search_options` is
    /// shallow-merged; every other field overrides wholesale.
    pub fn merged(defaults: &Self, call_site: Option<&Self>) -> Self {
        let Some(over) = call_site else {
            return defaults.clone();
        };
        Self {
            recent_messages: over.recent_messages.or(defaults.recent_messages),
            exclude_tool_messages: over
                .exclude_tool_messages
                .or(defaults.exclude_tool_messages),
            include_tool_calls: over.include_tool_calls.or(defaults.include_tool_calls),
            search_options: SearchOptions::merged(defaults.search_options, over.search_options),
            search_other_threads: over
                .search_other_threads
                .or(defaults.search_other_threads),
        }
    }

    fn resolved_exclude_tool_messages(&self) -> bool {
        if self.include_tool_calls == Some(true) {
            return false;
        }
        self.exclude_tool_messages.unwrap_or(true)
    }
}

/// Call-site inputs for context retrieval.
#[derive(Debug, Clone, Default)]
pub struct ContextArgs {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    /// The input messages of the pending call; the last one seeds the
    /// search query.
    pub messages: Vec<crate::types::CoreMessage>,
    /// Truncate history at this message, inclusive.
    pub up_to_and_including_message_id: Option<String>,
    /// Capability scope of the calling host function.
    pub scope: Scope,
}

/// Fetch the context for one generation call.
///
/// Recent history and search hits are merged (search hits prepended),
/// de-duplicated by id, sorted ascending by `(order, step_order)`, and
/// stripped of orphaned tool messages.
pub async fn fetch_context_messages(
    store: &dyn MessageStore,
    embedder: Option<&dyn EmbeddingModel>,
    args: &ContextArgs,
    options: &ContextOptions,
) -> Result<Vec<MessageDoc>, AgentError> {
    if args.user_id.is_none() && args.thread_id.is_none() {
        return Err(AgentError::InvalidArgument(
            "context retrieval requires a user_id or a thread_id".into(),
        ));
    }

    // Recent window.
    let mut context: Vec<MessageDoc> = Vec::new();
    if let Some(ref thread_id) = args.thread_id {
        let window_wanted = options.recent_messages != Some(0)
            || args.up_to_and_including_message_id.is_some();
        if window_wanted {
            let mut page = store
                .list_messages_by_thread(ListMessagesArgs {
                    thread_id: thread_id.clone(),
                    exclude_tool_messages: options.resolved_exclude_tool_messages(),
                    limit: options.recent_messages.unwrap_or(100),
                    up_to_and_including_message_id: args
                        .up_to_and_including_message_id
                        .clone(),
                    order: SortOrder::Desc,
                    statuses: vec![MessageStatus::Success],
                })
                .await
                .map_err(AgentError::Storage)?;
            page.page.reverse();
            context = page.page;
        }
    }

    let included: HashSet<String> = context.iter().map(|d| d.id.clone()).collect();

    // Hybrid search.
    let search = options.search_options.unwrap_or_default();
    if search.wants_search() {
        let mut queries: Vec<String> = Vec::new();
        if let Some(ref up_to) = args.up_to_and_including_message_id {
            if let Some(doc) = context.iter().find(|d| &d.id == up_to) {
                if let Some(ref text) = doc.text {
                    queries.push(text.clone());
                }
            }
        }
        if let Some(last) = args.messages.last() {
            let text = last.extracted_text();
            if !text.is_empty() {
                queries.push(text);
            }
        }
        if queries.is_empty() {
            return Err(AgentError::InvalidArgument(
                "search requested but there is no message text to search with".into(),
            ));
        }
        let query_text = queries.join("\n");

        let search_other_threads = options.search_other_threads == Some(true);
        if search_other_threads && !args.scope.is_action() {
            return Err(AgentError::Unsupported(
                "search_other_threads requires an action-scope call".into(),
            ));
        }

        let vector = match (search.vector_search == Some(true), embedder) {
            (true, Some(embedder)) => Some(embed_query(embedder, &query_text).await?),
            _ => None,
        };

        let hits = store
            .search_messages(SearchMessagesArgs {
                user_id: args.user_id.clone(),
                thread_id: if search_other_threads {
                    None
                } else {
                    args.thread_id.clone()
                },
                before_message_id: args.up_to_and_including_message_id.clone(),
                text: query_text,
                limit: search.limit.unwrap_or(10),
                message_range: search.message_range.unwrap_or_default(),
                vector_model: vector
                    .is_some()
                    .then(|| embedder.map(|e| e.model_id().to_string()))
                    .flatten(),
                vector,
                text_search: search.text_search == Some(true),
                vector_search: search.vector_search == Some(true),
            })
            .await
            .map_err(AgentError::Storage)?;

        debug!(hits = hits.len(), "context search finished");

        let fresh: Vec<MessageDoc> = hits
            .into_iter()
            .filter(|d| !included.contains(&d.id))
            .collect();
        let mut combined = fresh;
        combined.append(&mut context);
        context = combined;
    }

    context.sort_by_key(|d| (d.order, d.step_order));

    Ok(filter_orphaned_tool_messages(context))
}

/// Drop tool messages whose calls the model never saw.
///
/// A tool doc survives iff every tool-call id it answers was announced by
/// an earlier assistant doc in the list.
pub fn filter_orphaned_tool_messages(docs: Vec<MessageDoc>) -> Vec<MessageDoc> {
    let mut announced: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(docs.len());
    for doc in docs {
        for id in doc.message.tool_call_ids() {
            announced.insert(id.to_string());
        }
        let result_ids = doc.message.tool_result_ids();
        if !result_ids.is_empty() {
            let orphaned = result_ids.iter().any(|id| !announced.contains(*id));
            if orphaned {
                warn!(
                    message_id = %doc.id,
                    "dropping tool message with no matching tool call"
                );
                continue;
            }
        }
        kept.push(doc);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AddMessagesArgs, CreateThreadArgs, MemoryStore};
    use crate::types::{AssistantPart, CoreMessage, ToolResultPart};
    use serde_json::json;

    fn doc(id: &str, order: u64, step_order: u64, message: CoreMessage) -> MessageDoc {
        MessageDoc {
            id: id.into(),
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

    fn tool_call(id: &str) -> CoreMessage {
        CoreMessage::assistant_parts(vec![AssistantPart::ToolCall {
            tool_call_id: id.into(),
            tool_name: "t".into(),
            args: json!({}),
        }])
    }

    fn tool_result(id: &str) -> CoreMessage {
        CoreMessage::tool_results(vec![ToolResultPart {
            tool_call_id: id.into(),
            tool_name: "t".into(),
            result: json!("ok"),
        }])
    }

    // ========================================================================
    // Option merging
    // ========================================================================

    #[test]
    fn test_merge_call_site_wins() {
        let defaults = ContextOptions {
            recent_messages: Some(50),
            exclude_tool_messages: Some(true),
            ..Default::default()
        };
        let call_site = ContextOptions {
            recent_messages: Some(5),
            ..Default::default()
        };
        let merged = ContextOptions::merged(&defaults, Some(&call_site));
        assert_eq!(merged.recent_messages, Some(5));
        assert_eq!(merged.exclude_tool_messages, Some(true));
    }

    #[test]
    fn test_merge_search_options_is_shallow() {
        let defaults = ContextOptions {
            search_options: Some(SearchOptions {
                limit: Some(25),
                text_search: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let call_site = ContextOptions {
            search_options: Some(SearchOptions {
                vector_search: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = ContextOptions::merged(&defaults, Some(&call_site));
        let search = merged.search_options.unwrap();
        assert_eq!(search.limit, Some(25));
        assert_eq!(search.text_search, Some(true));
        assert_eq!(search.vector_search, Some(true));
    }

    #[test]
    fn test_legacy_include_tool_calls_flips_exclusion() {
        let options = ContextOptions {
            include_tool_calls: Some(true),
            exclude_tool_messages: Some(true),
            ..Default::default()
        };
        assert!(!options.resolved_exclude_tool_messages());
        assert!(ContextOptions::default().resolved_exclude_tool_messages());
    }

    // ========================================================================
    // Orphan filter
    // ========================================================================

    #[test]
    fn test_orphan_filter_drops_unannounced_results() {
        let docs = vec![
            doc("m1", 0, 0, tool_call("A")),
            doc("m2", 0, 1, tool_result("A")),
            doc("m3", 0, 2, tool_result("B")),
        ];
        let kept = filter_orphaned_tool_messages(docs);
        let ids: Vec<&str> = kept.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_orphan_filter_requires_every_result_id() {
        let mixed = CoreMessage::tool_results(vec![
            ToolResultPart {
                tool_call_id: "A".into(),
                tool_name: "t".into(),
                result: json!(1),
            },
            ToolResultPart {
                tool_call_id: "B".into(),
                tool_name: "t".into(),
                result: json!(2),
            },
        ]);
        let docs = vec![doc("m1", 0, 0, tool_call("A")), doc("m2", 0, 1, mixed)];
        let kept = filter_orphaned_tool_messages(docs);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_orphan_filter_keeps_result_after_its_call_only() {
        let docs = vec![
            doc("m1", 0, 0, tool_result("A")),
            doc("m2", 0, 1, tool_call("A")),
        ];
        let kept = filter_orphaned_tool_messages(docs);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "m2");
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    async fn seeded_store() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let thread = store
            .create_thread(CreateThreadArgs {
                user_id: Some("u1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        for text in ["tell me about rust", "rust is a systems language", "thanks"] {
            store
                .add_messages(AddMessagesArgs {
                    thread_id: thread.id.clone(),
                    user_id: Some("u1".into()),
                    agent_name: None,
                    prompt_message_id: None,
                    embeddings: None,
                    messages: vec![CoreMessage::user(text)],
                    metadata: None,
                    pending: false,
                    fail_pending_steps: false,
                    provider: None,
                    model: None,
                })
                .await
                .unwrap();
        }
        (store, thread.id)
    }

    #[tokio::test]
    async fn test_requires_user_or_thread() {
        let store = MemoryStore::new();
        let err = fetch_context_messages(
            &store,
            None,
            &ContextArgs::default(),
            &ContextOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_recent_window_ascending() {
        let (store, thread_id) = seeded_store().await;
        let context = fetch_context_messages(
            &store,
            None,
            &ContextArgs {
                thread_id: Some(thread_id),
                ..Default::default()
            },
            &ContextOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].text.as_deref(), Some("tell me about rust"));
        assert_eq!(context[2].text.as_deref(), Some("thanks"));
    }

    #[tokio::test]
    async fn test_recent_zero_disables_window() {
        let (store, thread_id) = seeded_store().await;
        let context = fetch_context_messages(
            &store,
            None,
            &ContextArgs {
                thread_id: Some(thread_id),
                ..Default::default()
            },
            &ContextOptions {
                recent_messages: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_search_merges_without_duplicates() {
        let (store, thread_id) = seeded_store().await;
        let context = fetch_context_messages(
            &store,
            None,
            &ContextArgs {
                thread_id: Some(thread_id),
                messages: vec![CoreMessage::user("more about rust please")],
                ..Default::default()
            },
            &ContextOptions {
                search_options: Some(SearchOptions {
                    text_search: Some(true),
                    limit: Some(10),
                    message_range: Some(MessageRange {
                        before: 0,
                        after: 0,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Everything is already in the recent window; search must not
        // duplicate any doc.
        let mut ids: Vec<&str> = context.iter().map(|d| d.id.as_str()).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        let positions: Vec<_> = context.iter().map(|d| (d.order, d.step_order)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[tokio::test]
    async fn test_search_other_threads_needs_action_scope() {
        let (store, thread_id) = seeded_store().await;
        let err = fetch_context_messages(
            &store,
            None,
            &ContextArgs {
                user_id: Some("u1".into()),
                thread_id: Some(thread_id),
                messages: vec![CoreMessage::user("rust")],
                scope: Scope::Mutation,
                ..Default::default()
            },
            &ContextOptions {
                search_options: Some(SearchOptions {
                    text_search: Some(true),
                    ..Default::default()
                }),
                search_other_threads: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_search_without_query_text_is_invalid() {
        let (store, thread_id) = seeded_store().await;
        let err = fetch_context_messages(
            &store,
            None,
            &ContextArgs {
                thread_id: Some(thread_id),
                messages: vec![],
                ..Default::default()
            },
            &ContextOptions {
                recent_messages: Some(0),
                search_options: Some(SearchOptions {
                    text_search: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }
}
