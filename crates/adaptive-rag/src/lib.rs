//! Query routing and retrieval refinement for document question answering.
//!
//! Each turn walks a small state graph: route the query, scope it to a
//! document when the user names one, retrieve, grade the passages, and
//! rewrite-and-retry a bounded number of times before answering.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod fuzzy;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timeout;
pub mod types;

// Re-export primary types for convenience
pub use collaborators::{
    CheckpointStore, DocumentRegistry, RegistryMatch, RetrievalOptions, RetrievalOutput,
    Retriever, ThreadCheckpoint,
};
pub use config::OrchestratorConfig;
pub use error::{NodeError, RagError, RagResult};
pub use graph::{Node, Orchestrator, TurnOutcome};
pub use llm::{ApiProvider, ChatMessage, ChatModel, ChatRole, ExternalChatModel, ModelId};
pub use storage::{
    InMemoryCheckpointStore, InMemoryDocumentRegistry, JsonFileCheckpointStore, StaticRetriever,
};
pub use types::{Document, DocumentFilter, QueryFilters, Route, ThreadInfo, TurnState};

pub use anyhow::{Error, Result};
