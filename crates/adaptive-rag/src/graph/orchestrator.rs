//! Turn execution over the node graph, with per-thread checkpointing.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use super::{initialize_state, next_node, reset_refinement_counter, Node};
use crate::collaborators::{CheckpointStore, DocumentRegistry, Retriever, ThreadCheckpoint};
use crate::config::OrchestratorConfig;
use crate::error::{NodeError, RagError};
use crate::llm::{ChatMessage, ChatModel, ExternalChatModel};
use crate::rag::{
    check_query_type, direct_answer, evaluate_retrieval_quality, generate_response, refine_query,
    retrieve_documents, GENERATION_APOLOGY,
};
use crate::storage::{InMemoryCheckpointStore, JsonFileCheckpointStore};
use crate::types::{Document, DocumentFilter, Route, ThreadInfo, TurnState};

/// What one turn hands back to the caller. Never an `Err`: failures show up
/// in `error` next to the best-effort answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub thread_id: String,
    /// `[user, assistant]`
    pub messages: Vec<ChatMessage>,
    pub documents: Vec<Document>,
    pub error: Option<NodeError>,
    pub route: Route,
    pub refinement_count: u32,
    pub active_document_filter: Option<DocumentFilter>,
}

impl TurnOutcome {
    pub fn answer(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    registry: Arc<dyn DocumentRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Orchestrator with in-memory thread state.
    pub fn new(
        model: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        registry: Arc<dyn DocumentRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            retriever,
            registry,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            config,
        }
    }

    /// Build from config: HTTP chat model for `config.model`, thread
    /// checkpoints as JSON files under `config.data_dir`.
    pub fn from_config(
        config: OrchestratorConfig,
        retriever: Arc<dyn Retriever>,
        registry: Arc<dyn DocumentRegistry>,
    ) -> Result<Self> {
        config.validate().map_err(RagError::Config)?;
        let model = ExternalChatModel::from_env(&config.model)?;
        let checkpoints = JsonFileCheckpointStore::new(&config.data_dir)?;

        tracing::info!(
            model = %config.model,
            data_dir = %config.data_dir.display(),
            "Orchestrator configured"
        );

        Ok(Self::new(Arc::new(model), retriever, registry, config)
            .with_checkpoint_store(Arc::new(checkpoints)))
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn new_thread_id() -> String {
        Uuid::new_v4().to_string()
    }

    async fn execute(&self, node: Node, mut state: TurnState) -> TurnState {
        let model = self.model.as_ref();
        match node {
            Node::InitializeState => initialize_state(state),
            Node::CheckQueryType => {
                state.route = check_query_type(&state.query, model, &self.config).await;
                state
            }
            Node::RetrieveDocuments => {
                retrieve_documents(state, self.retriever.as_ref(), self.registry.as_ref(), &self.config)
                    .await
            }
            Node::ResetRefinementCounter => reset_refinement_counter(state),
            Node::EvaluateRetrievalQuality => evaluate_retrieval_quality(state, model, &self.config).await,
            Node::RefineQuery => refine_query(state, model, &self.config).await,
            Node::GenerateResponse => generate_response(state, model, &self.config).await,
            Node::DirectAnswer => direct_answer(state, model, &self.config).await,
        }
    }

    /// Walk the graph once from `initializeState` to a terminal node.
    ///
    /// Refinements are counted here as well as in the state: the state's
    /// counter can be reset by a newly pinned document, this one cannot, so
    /// the turn never runs more than `max_refinements` refinement passes.
    pub async fn run_state(&self, mut state: TurnState) -> TurnState {
        let max_refinements = self.config.limits.max_refinements;
        let mut node = Node::InitializeState;
        let mut refinements = 0u32;

        loop {
            tracing::debug!(node = %node, "Entering node");
            if node == Node::RefineQuery {
                refinements += 1;
            }
            state = self.execute(node, state).await;

            let Some(mut next) = next_node(node, &state, &self.config) else {
                break;
            };
            if next == Node::RefineQuery && refinements >= max_refinements {
                tracing::warn!(
                    refinements,
                    refinement_count = state.refinement_count,
                    "Refinement budget for this turn spent, generating response"
                );
                next = Node::GenerateResponse;
            }
            node = next;
        }

        tracing::debug!(
            terminal = %node,
            refinements,
            error = state.error.is_some(),
            "Turn finished"
        );
        state
    }

    /// Run one turn on `thread_id`, or on a fresh thread when `None`.
    pub async fn run_turn(&self, thread_id: Option<&str>, query: &str) -> TurnOutcome {
        let thread_id = thread_id
            .map(str::to_string)
            .unwrap_or_else(Self::new_thread_id);

        let checkpoint = match self.checkpoints.load(&thread_id).await {
            Ok(found) => found.unwrap_or_default(),
            Err(e) => {
                let err = RagError::Checkpoint(e.to_string());
                tracing::warn!(thread_id = %thread_id, error = %err, "Starting turn without thread state");
                ThreadCheckpoint::default()
            }
        };

        let mut state = TurnState::new(query);
        state.original_query = checkpoint.original_query.clone();
        state.active_document_filter = checkpoint.active_document_filter.clone();
        state.thread_info = checkpoint.thread_info.clone();
        state.context_messages = checkpoint.history.clone();

        let mut state = self.run_state(state).await;

        let answer = state
            .answer
            .clone()
            .unwrap_or_else(|| GENERATION_APOLOGY.to_string());
        let messages = vec![ChatMessage::user(query), ChatMessage::assistant(answer)];

        self.save_checkpoint(&thread_id, checkpoint, &mut state, &messages)
            .await;

        TurnOutcome {
            thread_id,
            messages,
            documents: state.documents,
            error: state.error,
            route: state.route,
            refinement_count: state.refinement_count,
            active_document_filter: state.active_document_filter,
        }
    }

    /// Append the exchange to history. Thread fields are only taken from a
    /// turn that finished without an error.
    async fn save_checkpoint(
        &self,
        thread_id: &str,
        previous: ThreadCheckpoint,
        state: &mut TurnState,
        exchange: &[ChatMessage],
    ) {
        let mut update = ThreadInfo::new(thread_id);
        update.message_count = exchange.len();
        state.merge_thread_info(update);

        let mut history = previous.history.clone();
        history.extend_from_slice(exchange);
        let overflow = history
            .len()
            .saturating_sub(self.config.limits.max_history_messages);
        history.drain(..overflow);

        let checkpoint = if state.error.is_none() {
            ThreadCheckpoint {
                active_document_filter: state.active_document_filter.clone(),
                original_query: state.original_query.clone(),
                thread_info: state.thread_info.clone(),
                history,
            }
        } else {
            ThreadCheckpoint {
                thread_info: state.thread_info.clone(),
                history,
                ..previous
            }
        };

        if let Err(e) = self.checkpoints.save(thread_id, &checkpoint).await {
            let err = RagError::Checkpoint(e.to_string());
            tracing::warn!(thread_id = %thread_id, error = %err, "Thread state not saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::{FixedRegistry, ScriptedChatModel, ScriptedRetriever};

    fn orchestrator(
        model: ScriptedChatModel,
        retriever: ScriptedRetriever,
        registry: FixedRegistry,
    ) -> (Orchestrator, Arc<ScriptedChatModel>, Arc<ScriptedRetriever>) {
        let model = Arc::new(model);
        let retriever = Arc::new(retriever);
        let orchestrator = Orchestrator::new(
            model.clone(),
            retriever.clone(),
            Arc::new(registry),
            OrchestratorConfig::default(),
        );
        (orchestrator, model, retriever)
    }

    fn docs() -> Vec<Document> {
        vec![Document::new(
            "Revenue for the third quarter reached 4.2 million dollars.",
            "q3.pdf",
        )]
    }

    #[tokio::test]
    async fn test_good_retrieval_goes_straight_to_generation() {
        let (orchestrator, model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[8.0], &["unused"], "It was $4.2M."),
            ScriptedRetriever::always(docs()),
            FixedRegistry::empty(),
        );

        let state = orchestrator
            .run_state(TurnState::new("What was revenue last quarter?"))
            .await;

        assert_eq!(state.route, Route::Retrieve);
        assert_eq!(state.answer.as_deref(), Some("It was $4.2M."));
        assert_eq!(state.refinement_count, 0);
        assert_eq!(retriever.calls().len(), 1);
        // route, evaluate, generate
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_low_scores_refine_at_most_twice() {
        let (orchestrator, _model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes(
                "retrieve",
                &[2.0],
                &["third quarter revenue", "company income 2024"],
                "Best effort answer.",
            ),
            ScriptedRetriever::always(docs()),
            FixedRegistry::empty(),
        );

        let state = orchestrator
            .run_state(TurnState::new("What was revenue last quarter?"))
            .await;

        assert_eq!(state.refinement_count, 2);
        assert_eq!(retriever.calls().len(), 3);
        assert_eq!(retriever.calls()[2].0, "company income 2024");
        assert_eq!(state.answer.as_deref(), Some("Best effort answer."));
        assert_eq!(state.user_message, "What was revenue last quarter?");
    }

    #[tokio::test]
    async fn test_zero_documents_refines_without_evaluator_call() {
        let (orchestrator, model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[9.0], &["warranty coverage period"], "None found."),
            ScriptedRetriever::always(Vec::new()),
            FixedRegistry::empty(),
        );

        let state = orchestrator
            .run_state(TurnState::new("How long is the warranty?"))
            .await;

        assert_eq!(retriever.calls().len(), 3);
        assert_eq!(state.refinement_count, 2);
        assert_eq!(state.retrieval_quality, 0.0);
        // route, two refinements, generate; never the evaluator
        assert_eq!(model.call_count(), 4);
    }

    #[tokio::test]
    async fn test_new_filter_each_pass_still_terminates() {
        let rewrites = AtomicUsize::new(1);
        let model = ScriptedChatModel::from_fn(move |messages| {
            let first = &messages[0].content;
            if first.starts_with("You are judging") {
                Ok(r#"{"quality_score": 1, "should_refine": true}"#.to_string())
            } else if first.starts_with("You rewrite") {
                let n = rewrites.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!(r#"{{"refined_query": "summarize a{n}.pdf"}}"#))
            } else if first.starts_with("You are a query router") {
                Ok("retrieve".to_string())
            } else {
                Ok("done".to_string())
            }
        });
        let registry = FixedRegistry::new(&[("a1.pdf", 1.0), ("a2.pdf", 1.0), ("a3.pdf", 1.0), ("a4.pdf", 1.0)]);
        let (orchestrator, _model, retriever) =
            orchestrator(model, ScriptedRetriever::always(docs()), registry);

        let state = orchestrator.run_state(TurnState::new("summarize a1.pdf")).await;

        assert_eq!(retriever.calls().len(), 3);
        assert_eq!(state.active_document_filter.unwrap().source, "a3.pdf");
        assert_eq!(state.answer.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_each_turn_gets_its_own_refinement_budget() {
        let (orchestrator, _model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[9.0], &["onboarding steps"], "Nothing found."),
            ScriptedRetriever::always(Vec::new()),
            FixedRegistry::empty(),
        );

        let first = orchestrator.run_turn(Some("t"), "How do I onboard?").await;
        assert_eq!(first.refinement_count, 2);
        assert_eq!(retriever.calls().len(), 3);

        let second = orchestrator.run_turn(Some("t"), "Who approves leave?").await;
        assert_eq!(second.refinement_count, 2);
        assert_eq!(retriever.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_recovered_retrieval_clears_error() {
        let (orchestrator, _model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[8.0], &["q3 revenue total"], "It was 4.2M."),
            ScriptedRetriever::failing_then("transient index error", docs()),
            FixedRegistry::new(&[("q3.pdf", 1.0)]),
        );

        let outcome = orchestrator.run_turn(Some("t"), "Summarize q3.pdf").await;

        assert_eq!(retriever.calls().len(), 2);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.answer(), "It was 4.2M.");
        assert_eq!(outcome.documents.len(), 1);
        let saved = orchestrator.checkpoints.load("t").await.unwrap().unwrap();
        assert_eq!(saved.active_document_filter.unwrap().source, "q3.pdf");
        assert_eq!(saved.original_query, "Summarize q3.pdf");
    }

    #[tokio::test]
    async fn test_low_score_refines_when_evaluator_declines() {
        let model = ScriptedChatModel::from_fn(|messages| {
            let first = &messages[0].content;
            if first.starts_with("You are judging") {
                Ok(r#"{"quality_score": 3, "should_refine": false}"#.to_string())
            } else if first.starts_with("You rewrite") {
                Ok(r#"{"refined_query": "third quarter revenue"}"#.to_string())
            } else if first.starts_with("You are a query router") {
                Ok("retrieve".to_string())
            } else {
                Ok("Best effort.".to_string())
            }
        });
        let (orchestrator, _model, retriever) =
            orchestrator(model, ScriptedRetriever::always(docs()), FixedRegistry::empty());

        let state = orchestrator
            .run_state(TurnState::new("What was revenue last quarter?"))
            .await;

        assert_eq!(state.retrieval_quality, 3.0);
        assert_eq!(state.refinement_count, 2);
        assert_eq!(retriever.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_greeting_answers_directly() {
        let (orchestrator, model, retriever) = orchestrator(
            ScriptedChatModel::new(["Hello! What would you like to know?"]),
            ScriptedRetriever::always(docs()),
            FixedRegistry::empty(),
        );

        let outcome = orchestrator.run_turn(None, "hello").await;

        assert_eq!(outcome.route, Route::Direct);
        assert_eq!(outcome.answer(), "Hello! What would you like to know?");
        assert!(retriever.calls().is_empty());
        assert_eq!(model.call_count(), 1);
        assert!(Uuid::parse_str(&outcome.thread_id).is_ok());
    }

    #[tokio::test]
    async fn test_filter_and_history_carry_across_turns() {
        let (orchestrator, model, retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[8.0], &["unused"], "Answer."),
            ScriptedRetriever::always(docs()),
            FixedRegistry::new(&[("q3.pdf", 1.0)]),
        );

        let first = orchestrator.run_turn(Some("t1"), "Summarize q3.pdf").await;
        assert_eq!(first.active_document_filter.clone().unwrap().source, "q3.pdf");

        let second = orchestrator
            .run_turn(Some("t1"), "What does this document say about costs?")
            .await;
        assert_eq!(second.active_document_filter.unwrap().source, "q3.pdf");
        assert_eq!(second.messages.len(), 2);

        let filter = retriever.calls()[1].1.filter.clone().unwrap();
        assert_eq!(filter.get("metadata.source"), Some(&serde_json::Value::from("q3.pdf")));

        // generation for turn two sees turn one's exchange
        let generation = model.requests().last().cloned().unwrap();
        assert!(generation.iter().any(|m| m.content == "Summarize q3.pdf"));

        let saved = orchestrator.checkpoints.load("t1").await.unwrap().unwrap();
        assert_eq!(saved.original_query, "Summarize q3.pdf");
        assert_eq!(saved.history.len(), 4);
        assert_eq!(saved.thread_info.unwrap().message_count, 4);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (orchestrator, _model, _retriever) = orchestrator(
            ScriptedChatModel::new(["hi!"]),
            ScriptedRetriever::always(Vec::new()),
            FixedRegistry::empty(),
        );
        let mut config = OrchestratorConfig::default();
        config.limits.max_history_messages = 4;
        let orchestrator = Orchestrator { config, ..orchestrator };

        for _ in 0..5 {
            orchestrator.run_turn(Some("t"), "hi").await;
        }

        let saved = orchestrator.checkpoints.load("t").await.unwrap().unwrap();
        assert_eq!(saved.history.len(), 4);
        assert_eq!(saved.thread_info.unwrap().message_count, 10);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_previous_thread_fields() {
        let (orchestrator, _model, _retriever) = orchestrator(
            ScriptedChatModel::for_nodes("retrieve", &[8.0], &["unused"], "Answer."),
            ScriptedRetriever::failing("index offline"),
            FixedRegistry::new(&[("q3.pdf", 1.0)]),
        );
        let previous = ThreadCheckpoint {
            active_document_filter: Some(DocumentFilter::new("old.pdf", "earlier")),
            original_query: "first".to_string(),
            ..ThreadCheckpoint::default()
        };
        orchestrator.checkpoints.save("t", &previous).await.unwrap();

        let outcome = orchestrator.run_turn(Some("t"), "Summarize q3.pdf").await;

        assert_eq!(outcome.error.clone().unwrap().node, "retrieveDocuments");
        assert!(!outcome.answer().is_empty());
        let saved = orchestrator.checkpoints.load("t").await.unwrap().unwrap();
        assert_eq!(saved.active_document_filter.unwrap().source, "old.pdf");
        assert_eq!(saved.history.len(), 2);
    }
}
