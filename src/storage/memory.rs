//! In-memory reference implementation of the storage contract, for tests
//! and local development.

use super::{
    AddMessagesArgs, AddStepArgs, CreateThreadArgs, ListMessagesArgs, MessagePage, MessageStore,
    SearchMessagesArgs, SortOrder,
};
use crate::error::StoreError;
use crate::types::{new_id, now_millis, MessageDoc, MessageStatus, ThreadDoc};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct StoredEmbedding {
    vector: Vec<f32>,
    model: String,
}

struct ThreadEntry {
    thread: ThreadDoc,
    messages: Vec<MessageDoc>,
}

#[derive(Default)]
struct Inner {
    threads: HashMap<String, ThreadEntry>,
    embeddings: HashMap<String, StoredEmbedding>,
    /// message id → thread id
    message_index: HashMap<String, String>,
}

/// In-memory message store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one message by id. Test and debugging helper; not part of the
    /// storage contract.
    pub async fn get_message(&self, message_id: &str) -> Option<MessageDoc> {
        let inner = self.inner.read().await;
        let thread_id = inner.message_index.get(message_id)?;
        inner
            .threads
            .get(thread_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }
}

fn position(doc: &MessageDoc) -> (u64, u64) {
    (doc.order, doc.step_order)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Fraction of query terms present in the document text.
fn text_score(query: &str, text: &str) -> f32 {
    let haystack = text.to_lowercase();
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| haystack.contains(*t)).count();
    hits as f32 / terms.len() as f32
}

impl Inner {
    fn entry(&self, thread_id: &str) -> Result<&ThreadEntry, StoreError> {
        self.threads
            .get(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))
    }

    fn entry_mut(&mut self, thread_id: &str) -> Result<&mut ThreadEntry, StoreError> {
        self.threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))
    }

    fn find_message(&self, message_id: &str) -> Result<(&str, &MessageDoc), StoreError> {
        let thread_id = self
            .message_index
            .get(message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
        let doc = self
            .entry(thread_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
        Ok((thread_id.as_str(), doc))
    }

    /// Position the next batch: continue the prompt's group, or open a new
    /// `order` after the thread's current maximum.
    fn base_position(
        entry: &ThreadEntry,
        prompt_message_id: Option<&str>,
    ) -> Result<(u64, u64), StoreError> {
        match prompt_message_id {
            Some(prompt_id) => {
                let prompt = entry
                    .messages
                    .iter()
                    .find(|m| m.id == prompt_id)
                    .ok_or_else(|| StoreError::MessageNotFound(prompt_id.to_string()))?;
                let max_step = entry
                    .messages
                    .iter()
                    .filter(|m| m.order == prompt.order)
                    .map(|m| m.step_order)
                    .max()
                    .unwrap_or(0);
                Ok((prompt.order, max_step + 1))
            }
            None => {
                let next_order = entry
                    .messages
                    .iter()
                    .map(|m| m.order + 1)
                    .max()
                    .unwrap_or(0);
                Ok((next_order, 0))
            }
        }
    }

    fn fail_pending(entry: &mut ThreadEntry) {
        for doc in entry.messages.iter_mut() {
            if doc.status == MessageStatus::Pending {
                doc.status = MessageStatus::Failed;
                doc.error = Some("superseded by a newer generation".to_string());
            }
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadDoc, StoreError> {
        let thread = ThreadDoc {
            id: new_id(),
            user_id: args.user_id,
            title: args.title,
            summary: args.summary,
            created_at: now_millis(),
        };
        let mut inner = self.inner.write().await;
        inner.threads.insert(
            thread.id.clone(),
            ThreadEntry {
                thread: thread.clone(),
                messages: Vec::new(),
            },
        );
        Ok(thread)
    }

    async fn list_messages_by_thread(
        &self,
        args: ListMessagesArgs,
    ) -> Result<MessagePage, StoreError> {
        let inner = self.inner.read().await;
        let entry = inner.entry(&args.thread_id)?;

        let cutoff = match &args.up_to_and_including_message_id {
            Some(id) => Some(position(
                entry
                    .messages
                    .iter()
                    .find(|m| &m.id == id)
                    .ok_or_else(|| StoreError::MessageNotFound(id.clone()))?,
            )),
            None => None,
        };

        let mut docs: Vec<MessageDoc> = entry
            .messages
            .iter()
            .filter(|m| args.statuses.is_empty() || args.statuses.contains(&m.status))
            .filter(|m| !args.exclude_tool_messages || !m.tool)
            .filter(|m| cutoff.is_none_or(|c| position(m) <= c))
            .cloned()
            .collect();

        docs.sort_by_key(position);
        if args.order == SortOrder::Desc {
            docs.reverse();
        }

        let limit = args.limit.clamp(1, 500);
        let is_done = docs.len() <= limit;
        docs.truncate(limit);
        Ok(MessagePage {
            page: docs,
            is_done,
        })
    }

    async fn search_messages(
        &self,
        args: SearchMessagesArgs,
    ) -> Result<Vec<MessageDoc>, StoreError> {
        let inner = self.inner.read().await;

        let cutoff = match &args.before_message_id {
            Some(id) => {
                let (_, doc) = inner.find_message(id)?;
                Some(position(doc))
            }
            None => None,
        };

        // Candidate threads: the named thread, or every thread of the user.
        let thread_ids: Vec<&str> = match &args.thread_id {
            Some(id) => vec![id.as_str()],
            None => inner
                .threads
                .values()
                .filter(|e| {
                    args.user_id.is_some() && e.thread.user_id == args.user_id
                })
                .map(|e| e.thread.id.as_str())
                .collect(),
        };

        let mut scored: Vec<(f32, &MessageDoc)> = Vec::new();
        for thread_id in &thread_ids {
            let entry = inner.entry(thread_id)?;
            for doc in &entry.messages {
                if doc.status != MessageStatus::Success || doc.tool {
                    continue;
                }
                if let Some(c) = cutoff {
                    if position(doc) >= c {
                        continue;
                    }
                }
                let mut score = 0.0f32;
                if args.text_search {
                    if let Some(ref text) = doc.text {
                        score = score.max(text_score(&args.text, text));
                    }
                }
                if args.vector_search {
                    if let (Some(query), Some(embedding_id)) =
                        (args.vector.as_ref(), doc.embedding_id.as_ref())
                    {
                        if let Some(stored) = inner.embeddings.get(embedding_id) {
                            let same_model = args
                                .vector_model
                                .as_deref()
                                .is_none_or(|m| m == stored.model);
                            if same_model {
                                score = score.max(cosine(query, &stored.vector));
                            }
                        }
                    }
                }
                if score > 0.0 {
                    scored.push((score, doc));
                }
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(args.limit);

        // Expand each hit with its surrounding messages, then dedupe.
        let mut picked: Vec<MessageDoc> = Vec::new();
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for (_, hit) in &scored {
            let entry = inner.entry(&hit.thread_id)?;
            let mut ordered: Vec<&MessageDoc> = entry
                .messages
                .iter()
                .filter(|m| m.status == MessageStatus::Success)
                .collect();
            ordered.sort_by_key(|m| position(m));
            let Some(index) = ordered.iter().position(|m| m.id == hit.id) else {
                continue;
            };
            let start = index.saturating_sub(args.message_range.before);
            let end = (index + args.message_range.after + 1).min(ordered.len());
            for doc in &ordered[start..end] {
                if seen.insert(doc.id.as_str()) {
                    picked.push((*doc).clone());
                }
            }
        }

        picked.sort_by_key(position);
        Ok(picked)
    }

    async fn add_messages(&self, args: AddMessagesArgs) -> Result<Vec<MessageDoc>, StoreError> {
        let mut inner = self.inner.write().await;

        // Stash embeddings first so docs can reference their ids.
        let mut embedding_ids: Vec<Option<String>> = vec![None; args.messages.len()];
        if let Some(ref embeddings) = args.embeddings {
            if embeddings.vectors.len() != args.messages.len() {
                return Err(StoreError::Serialization(format!(
                    "{} embedding slots for {} messages",
                    embeddings.vectors.len(),
                    args.messages.len()
                )));
            }
            for (i, vector) in embeddings.vectors.iter().enumerate() {
                if let Some(vector) = vector {
                    let id = new_id();
                    inner.embeddings.insert(
                        id.clone(),
                        StoredEmbedding {
                            vector: vector.clone(),
                            model: embeddings.model.clone(),
                        },
                    );
                    embedding_ids[i] = Some(id);
                }
            }
        }

        let entry = inner.entry_mut(&args.thread_id)?;
        if args.fail_pending_steps {
            Inner::fail_pending(entry);
        }

        let (order, base_step) = Inner::base_position(entry, args.prompt_message_id.as_deref())?;
        let status = if args.pending {
            MessageStatus::Pending
        } else {
            MessageStatus::Success
        };

        let mut created = Vec::with_capacity(args.messages.len());
        let mut metadata = args.metadata;
        for (i, message) in args.messages.into_iter().enumerate() {
            let doc = MessageDoc {
                id: new_id(),
                thread_id: args.thread_id.clone(),
                user_id: args.user_id.clone(),
                agent_name: args.agent_name.clone(),
                order,
                step_order: base_step + i as u64,
                status,
                text: {
                    let text = message.extracted_text();
                    (!text.is_empty()).then_some(text)
                },
                tool: message.is_tool(),
                message,
                embedding_id: embedding_ids[i].take(),
                error: None,
                provider: args.provider.clone(),
                model: args.model.clone(),
                metadata: metadata
                    .as_mut()
                    .and_then(|m| m.get_mut(i))
                    .map(std::mem::take)
                    .filter(|v| !v.is_null()),
            };
            entry.messages.push(doc.clone());
            created.push(doc);
        }

        let ids: Vec<(String, String)> = created
            .iter()
            .map(|d| (d.id.clone(), d.thread_id.clone()))
            .collect();
        for (message_id, thread_id) in ids {
            inner.message_index.insert(message_id, thread_id);
        }
        Ok(created)
    }

    async fn add_step(&self, args: AddStepArgs) -> Result<Vec<MessageDoc>, StoreError> {
        self.add_messages(AddMessagesArgs {
            thread_id: args.thread_id,
            user_id: args.user_id,
            agent_name: args.agent_name,
            prompt_message_id: Some(args.prompt_message_id),
            embeddings: args.step.embeddings,
            messages: args.step.messages,
            metadata: None,
            pending: false,
            fail_pending_steps: args.fail_pending_steps,
            provider: args.provider,
            model: args.model,
        })
        .await
    }

    async fn commit_message(&self, message_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let (thread_id, doc) = inner.find_message(message_id)?;
        let (thread_id, order) = (thread_id.to_string(), doc.order);
        let entry = inner.entry_mut(&thread_id)?;
        for doc in entry.messages.iter_mut() {
            if doc.order == order && doc.status == MessageStatus::Pending {
                doc.status = MessageStatus::Success;
            }
        }
        Ok(())
    }

    async fn rollback_message(&self, message_id: &str, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let (thread_id, doc) = inner.find_message(message_id)?;
        let (thread_id, order) = (thread_id.to_string(), doc.order);
        let entry = inner.entry_mut(&thread_id)?;
        for doc in entry.messages.iter_mut() {
            if doc.order == order && doc.status == MessageStatus::Pending {
                doc.status = MessageStatus::Failed;
                if doc.id == message_id {
                    doc.error = Some(error.to_string());
                }
            }
        }
        Ok(())
    }
}
