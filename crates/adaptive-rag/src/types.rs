use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeError;
use crate::llm::ChatMessage;

/// Filter map handed to the retriever (`metadata.source`, `sortBy`, ...).
pub type QueryFilters = Map<String, Value>;

pub const SOURCE_KEY: &str = "metadata.source";
pub const CONTENT_TYPE_KEY: &str = "metadata.contentType";
pub const SORT_BY_KEY: &str = "sortBy";
pub const SORT_DIRECTION_KEY: &str = "sortDirection";
pub const LATEST_KEY: &str = "__LATEST__";
pub const PARSED_AT_FIELD: &str = "metadata.parsedAt";

/// A retrieved passage. Produced by the retriever, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), Value::String(source.into()));
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get("contentType").and_then(Value::as_str)
    }

    pub fn parsed_at(&self) -> Option<&str> {
        self.metadata.get("parsedAt").and_then(Value::as_str)
    }
}

/// Sticky pointer to the single document a conversation is scoped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    pub source: String,
    /// Human-readable provenance, diagnostic only.
    pub filter_applied: String,
}

impl DocumentFilter {
    pub fn new(source: impl Into<String>, filter_applied: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filter_applied: filter_applied.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Retrieve,
    Direct,
    #[default]
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub thread_id: String,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
}

impl ThreadInfo {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            last_updated: Utc::now(),
            message_count: 0,
        }
    }

    /// Merge an update into this record: counts accumulate, the newest
    /// timestamp wins, the thread id is kept unless this record has none.
    pub fn merge(&mut self, update: &ThreadInfo) {
        if self.thread_id.is_empty() {
            self.thread_id = update.thread_id.clone();
        }
        self.message_count += update.message_count;
        if update.last_updated > self.last_updated {
            self.last_updated = update.last_updated;
        }
    }
}

/// Evaluator verdict for the latest retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub quality_score: f32,
    pub reasoning: String,
    pub should_refine: bool,
}

/// Everything one turn reads and writes while walking the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnState {
    /// The user's message for this turn, untouched by refinement.
    pub user_message: String,
    pub query: String,
    /// First question asked on the thread.
    pub original_query: String,
    pub refined_query: Option<String>,
    pub refinement_count: u32,
    pub route: Route,
    pub active_document_filter: Option<DocumentFilter>,
    pub new_explicit_filter_set: bool,
    /// Filters from the most recent extraction, for diagnostics.
    pub query_filters: QueryFilters,
    pub documents: Vec<Document>,
    pub previous_documents: Vec<Document>,
    pub retrieval_quality: f32,
    pub assessment: Option<QualityAssessment>,
    /// Prior conversation, oldest first.
    pub context_messages: Vec<ChatMessage>,
    pub answer: Option<String>,
    pub error: Option<NodeError>,
    pub thread_info: Option<ThreadInfo>,
}

impl TurnState {
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            user_message: query.clone(),
            query,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, error: NodeError) {
        tracing::error!(node = %error.node, message = %error.message, "Node recorded error");
        self.error = Some(error);
    }

    pub fn merge_thread_info(&mut self, update: ThreadInfo) {
        match self.thread_info.as_mut() {
            Some(existing) => existing.merge(&update),
            None => self.thread_info = Some(update),
        }
    }
}
