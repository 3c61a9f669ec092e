//! VectorIndex trait — abstract interface for the external vector store.
//!
//! The primary implementation is `PineconeIndex` in the `pinecone` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub chunk_text: String,
    pub category: String,
    pub url: String,
}

/// One record upserted into the index. Append-only: records are never
/// updated or deleted by this system.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub chunk_text: String,
}

/// A match returned by a similarity query. Only metadata comes back; the
/// stored vector is never requested.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievedMatch {
    #[serde(default)]
    pub metadata: Option<MatchMetadata>,
}

impl RetrievedMatch {
    /// The stored chunk text; a match without metadata yields an empty
    /// string rather than an error.
    pub fn chunk_text(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|m| m.chunk_text.as_str())
            .unwrap_or("")
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upsert one record into the given namespace.
    async fn upsert(&self, namespace: &str, record: IndexRecord) -> Result<(), ApiError>;

    /// Query the `top_k` nearest neighbours in the namespace, ordered by
    /// descending similarity. Zero matches is a valid result, not an error.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedMatch>, ApiError>;
}
