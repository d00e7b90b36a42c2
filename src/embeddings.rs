//! Embedding generation for message batches.
//!
//! Vectors are generated before messages are persisted so a searchable
//! message is never stored un-embedded; a failing embedding call fails the
//! enclosing generation.

use crate::error::AgentError;
use crate::provider::EmbeddingModel;
use crate::types::CoreMessage;
use serde::{Deserialize, Serialize};

/// Vector dimensions the storage layer indexes.
pub const ACCEPTED_DIMENSIONS: [usize; 9] = [128, 256, 512, 768, 1024, 1536, 2048, 3072, 4096];

/// Embedding vectors aligned with a message batch.
///
/// `vectors.len()` always equals the batch length; an entry is `None` iff
/// the message is a tool message or has no extractable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEmbeddings {
    pub model: String,
    pub dimension: usize,
    pub vectors: Vec<Option<Vec<f32>>>,
}

/// Embed a batch of messages, preserving positional alignment.
///
/// Returns `None` when nothing in the batch is embeddable.
pub async fn generate_embeddings(
    model: &dyn EmbeddingModel,
    messages: &[CoreMessage],
) -> Result<Option<MessageEmbeddings>, AgentError> {
    let texts: Vec<String> = messages
        .iter()
        .map(|m| {
            if m.is_tool() {
                String::new()
            } else {
                m.extracted_text()
            }
        })
        .collect();

    let indexed: Vec<(usize, String)> = texts
        .into_iter()
        .enumerate()
        .filter(|(_, t)| !t.is_empty())
        .collect();

    if indexed.is_empty() {
        return Ok(None);
    }

    let values: Vec<String> = indexed.iter().map(|(_, t)| t.clone()).collect();
    let embedded = model.embed(values).await?;

    if embedded.len() != indexed.len() {
        return Err(AgentError::Provider(format!(
            "embedding backend returned {} vectors for {} inputs",
            embedded.len(),
            indexed.len()
        )));
    }

    let dimension = validate_dimension(embedded.first().map_or(0, |v| v.len()))?;

    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; messages.len()];
    for ((index, _), vector) in indexed.into_iter().zip(embedded) {
        if vector.len() != dimension {
            return Err(AgentError::Provider(format!(
                "embedding backend returned mixed dimensions ({} and {})",
                dimension,
                vector.len()
            )));
        }
        vectors[index] = Some(vector);
    }

    Ok(Some(MessageEmbeddings {
        model: model.model_id().to_string(),
        dimension,
        vectors,
    }))
}

/// Embed a single query text. Used by vector search.
pub async fn embed_query(model: &dyn EmbeddingModel, text: &str) -> Result<Vec<f32>, AgentError> {
    let mut vectors = model.embed(vec![text.to_string()]).await?;
    let vector = vectors
        .pop()
        .ok_or_else(|| AgentError::Provider("embedding backend returned no vector".into()))?;
    validate_dimension(vector.len())?;
    Ok(vector)
}

fn validate_dimension(dimension: usize) -> Result<usize, AgentError> {
    if ACCEPTED_DIMENSIONS.contains(&dimension) {
        Ok(dimension)
    } else {
        Err(AgentError::InvalidArgument(format!(
            "unknown vector dimension {dimension}, expected one of {ACCEPTED_DIMENSIONS:?}"
        )))
    }
}
