//! Contracts the orchestrator consumes from the rest of the system.
//!
//! Implementations live outside the core; `crate::storage` ships in-memory
//! and file-backed versions for embedding and tests.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::types::{Document, DocumentFilter, QueryFilters, ThreadInfo};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilters>,
    pub new_explicit_filter_set: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutput {
    /// `None` is treated as an empty result.
    #[serde(default)]
    pub documents: Option<Vec<Document>>,
}

/// Vector / hybrid search over ingested chunks. Must not fail on zero matches.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn invoke(&self, query: &str, options: RetrievalOptions) -> Result<RetrievalOutput>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMatch {
    pub filename: String,
    /// 0.0 - 1.0
    pub similarity: f64,
}

/// Lookup from fuzzy names to canonical filenames.
///
/// Result ordering is not guaranteed; callers sort.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    async fn find_document_by_name(
        &self,
        search_term: &str,
        exact_match: bool,
    ) -> Result<Vec<RegistryMatch>>;
}

/// Per-thread state that survives between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCheckpoint {
    #[serde(default)]
    pub active_document_filter: Option<DocumentFilter>,
    #[serde(default)]
    pub original_query: String,
    #[serde(default)]
    pub thread_info: Option<ThreadInfo>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Persistence for [`ThreadCheckpoint`]s keyed by thread id.
///
/// Callers guarantee at most one in-flight turn per thread.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>>;
    async fn save(&self, thread_id: &str, checkpoint: &ThreadCheckpoint) -> Result<()>;
}
