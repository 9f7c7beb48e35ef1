//! The turn state machine: named nodes, and the edges between them.
//!
//! ```text
//! initializeState -> checkQueryType -> retrieveDocuments | directAnswer
//! retrieveDocuments -> resetRefinementCounter -> evaluateRetrievalQuality
//! evaluateRetrievalQuality -> generateResponse | refineQuery
//! refineQuery -> retrieveDocuments
//! ```
//!
//! Nodes are functions over [`TurnState`]; [`next_node`] is the only place
//! control flow is decided.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, TurnOutcome};

use std::fmt;

use crate::config::OrchestratorConfig;
use crate::error::RagError;
use crate::types::{Route, TurnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    InitializeState,
    CheckQueryType,
    RetrieveDocuments,
    ResetRefinementCounter,
    EvaluateRetrievalQuality,
    RefineQuery,
    GenerateResponse,
    DirectAnswer,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::InitializeState => "initializeState",
            Node::CheckQueryType => "checkQueryType",
            Node::RetrieveDocuments => "retrieveDocuments",
            Node::ResetRefinementCounter => "resetRefinementCounter",
            Node::EvaluateRetrievalQuality => "evaluateRetrievalQuality",
            Node::RefineQuery => "refineQuery",
            Node::GenerateResponse => "generateResponse",
            Node::DirectAnswer => "directAnswer",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::GenerateResponse | Node::DirectAnswer)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge out of `evaluateRetrievalQuality`.
///
/// The refinement budget is checked first so a run of low scores always
/// terminates. Below that only the score decides; the evaluator's
/// `should_refine` is kept for diagnostics.
pub fn route_after_evaluation(state: &TurnState, config: &OrchestratorConfig) -> Node {
    if state.refinement_count >= config.limits.max_refinements {
        return Node::GenerateResponse;
    }
    if state.retrieval_quality >= config.thresholds.quality_pass {
        return Node::GenerateResponse;
    }
    Node::RefineQuery
}

/// Successor of `current`, or `None` after a terminal node.
pub fn next_node(current: Node, state: &TurnState, config: &OrchestratorConfig) -> Option<Node> {
    let next = match current {
        Node::InitializeState => Node::CheckQueryType,
        Node::CheckQueryType => match state.route {
            Route::Direct => Node::DirectAnswer,
            Route::Retrieve => Node::RetrieveDocuments,
            Route::Unset => {
                let err = RagError::UnsupportedRoute(format!("{:?}", state.route));
                tracing::warn!(error = %err, "Defaulting to retrieval");
                Node::RetrieveDocuments
            }
        },
        Node::RetrieveDocuments => Node::ResetRefinementCounter,
        Node::ResetRefinementCounter => Node::EvaluateRetrievalQuality,
        Node::EvaluateRetrievalQuality => route_after_evaluation(state, config),
        Node::RefineQuery => Node::RetrieveDocuments,
        Node::GenerateResponse | Node::DirectAnswer => return None,
    };
    Some(next)
}

/// Fresh per-turn fields; thread-level fields seeded by the caller survive.
/// Every turn starts with its own refinement budget.
pub fn initialize_state(mut state: TurnState) -> TurnState {
    if state.original_query.is_empty() {
        state.original_query = state.user_message.clone();
    }
    state.query = state.user_message.clone();
    state.refined_query = None;
    state.refinement_count = 0;
    state.route = Route::Unset;
    state.new_explicit_filter_set = false;
    state.query_filters.clear();
    state.documents.clear();
    state.previous_documents.clear();
    state.retrieval_quality = 0.0;
    state.assessment = None;
    state.answer = None;
    state.error = None;
    state
}

/// A newly pinned document gets a fresh refinement budget.
pub fn reset_refinement_counter(mut state: TurnState) -> TurnState {
    if state.new_explicit_filter_set && state.refinement_count != 0 {
        tracing::info!(
            previous = state.refinement_count,
            source = state.active_document_filter.as_ref().map(|f| f.source.as_str()),
            "New document filter, resetting refinement count"
        );
        state.refinement_count = 0;
    }
    state
}
