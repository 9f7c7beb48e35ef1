//! Error taxonomy for the orchestrator.
//!
//! Collaborators report failures as `anyhow::Error`; the nodes map them into
//! [`RagError`] at the call site so fallbacks can tell a deadline from a model
//! or registry failure. [`NodeError`] is the serialisable record that ends up
//! in `TurnState::error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// A wrapped call exceeded its deadline.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The chat model call itself failed.
    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    /// Registry RPC failed or credentials are missing.
    #[error("registry lookup failed: {0}")]
    RegistryLookup(String),

    /// Retrieval capability failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Model response was not valid JSON where JSON was required.
    #[error("could not parse model response: {0}")]
    Parse(String),

    /// Prompt rendering task panicked or was cancelled.
    #[error("prompt formatting failed: {0}")]
    PromptFormat(String),

    /// Unset or unknown route value.
    #[error("unsupported route: {0}")]
    UnsupportedRoute(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),
}

impl RagError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;

/// Failure record attached to the turn state by the node that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    pub message: String,
    pub node: String,
    pub timestamp: DateTime<Utc>,
}

impl NodeError {
    pub fn new(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node: node.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_error(node: impl Into<String>, error: &RagError) -> Self {
        Self::new(node, error.to_string())
    }
}
