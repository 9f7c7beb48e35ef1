//! Retrieval node: scope the query, then call the retriever.

use serde_json::Value;

use crate::collaborators::{DocumentRegistry, RetrievalOptions, Retriever};
use crate::config::OrchestratorConfig;
use crate::error::{NodeError, RagError};
use crate::graph::Node;
use crate::rag::query_filters::extract_query_filters;
use crate::timeout::with_timeout;
use crate::types::{QueryFilters, TurnState, SOURCE_KEY};

/// Query filters plus the active source, as sent to the retriever.
pub fn merge_filters(state: &TurnState) -> QueryFilters {
    let mut merged = state.query_filters.clone();
    if let Some(filter) = &state.active_document_filter {
        merged.insert(SOURCE_KEY.to_string(), Value::String(filter.source.clone()));
    }
    merged
}

pub async fn retrieve_documents(
    mut state: TurnState,
    retriever: &dyn Retriever,
    registry: &dyn DocumentRegistry,
    config: &OrchestratorConfig,
) -> TurnState {
    let extracted = extract_query_filters(
        &state.query,
        state.active_document_filter.as_ref(),
        state.refinement_count,
        registry,
        config,
    )
    .await;

    state.active_document_filter = extracted.active_document_filter;
    state.new_explicit_filter_set = extracted.new_explicit_filter_set;
    state.query_filters = extracted.query_filters;

    let merged = merge_filters(&state);
    let options = RetrievalOptions {
        filter: (!merged.is_empty()).then_some(merged),
        new_explicit_filter_set: state.new_explicit_filter_set,
    };

    let query = extracted.cleaned_query;
    let result = with_timeout("retrieve documents", config.timeouts.retrieval_ms, async {
        retriever
            .invoke(&query, options)
            .await
            .map_err(|e| RagError::Retrieval(e.to_string()))
    })
    .await;

    match result {
        Ok(output) => {
            state.documents = output.documents.unwrap_or_default();
            if state
                .error
                .as_ref()
                .is_some_and(|e| e.node == Node::RetrieveDocuments.as_str())
            {
                tracing::info!("Retrieval recovered, dropping earlier failure");
                state.error = None;
            }
            tracing::info!(
                query = %query,
                documents = state.documents.len(),
                source = state.active_document_filter.as_ref().map(|f| f.source.as_str()),
                "Retrieved documents"
            );
        }
        Err(e) => {
            state.documents = Vec::new();
            state.record_error(NodeError::from_error(Node::RetrieveDocuments.as_str(), &e));
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedRegistry, ScriptedRetriever};
    use crate::types::{Document, DocumentFilter};

    #[tokio::test]
    async fn test_source_filter_is_forwarded() {
        let retriever = ScriptedRetriever::always(vec![Document::new("hello", "test.pdf")]);
        let registry = FixedRegistry::new(&[("test.pdf", 1.0)]);
        let config = OrchestratorConfig::default();

        let state = retrieve_documents(
            TurnState::new("Tell me about test.pdf"),
            &retriever,
            &registry,
            &config,
        )
        .await;

        assert_eq!(state.documents.len(), 1);
        assert!(state.new_explicit_filter_set);
        let calls = retriever.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Tell me about test.pdf");
        let filter = calls[0].1.filter.clone().unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get(SOURCE_KEY), Some(&Value::from("test.pdf")));
        assert!(calls[0].1.new_explicit_filter_set);
    }

    #[tokio::test]
    async fn test_sticky_filter_is_injected_when_query_is_silent() {
        let retriever = ScriptedRetriever::always(vec![]);
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("what about the vacation policy");
        state.active_document_filter = Some(DocumentFilter::new("handbook.pdf", "earlier turn"));

        let state = retrieve_documents(state, &retriever, &registry, &config).await;

        assert!(!state.new_explicit_filter_set);
        let filter = retriever.calls()[0].1.filter.clone().unwrap();
        assert_eq!(filter.get(SOURCE_KEY), Some(&Value::from("handbook.pdf")));
    }

    #[tokio::test]
    async fn test_no_filters_sends_none() {
        let retriever = ScriptedRetriever::always(vec![]);
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();

        retrieve_documents(
            TurnState::new("What is the capital of France?"),
            &retriever,
            &registry,
            &config,
        )
        .await;

        assert_eq!(retriever.calls()[0].1.filter, None);
    }

    #[tokio::test]
    async fn test_missing_documents_field_is_empty() {
        let retriever = ScriptedRetriever::missing_documents();
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("quarterly numbers");
        state.documents = vec![Document::new("stale", "old.pdf")];

        let state = retrieve_documents(state, &retriever, &registry, &config).await;

        assert!(state.documents.is_empty());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_retriever_failure_records_node_error() {
        let retriever = ScriptedRetriever::failing("index offline");
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();

        let state =
            retrieve_documents(TurnState::new("quarterly numbers"), &retriever, &registry, &config)
                .await;

        assert!(state.documents.is_empty());
        let error = state.error.unwrap();
        assert_eq!(error.node, "retrieveDocuments");
        assert!(error.message.contains("index offline"));
    }

    #[tokio::test]
    async fn test_successful_retry_clears_retrieval_error() {
        let retriever =
            ScriptedRetriever::failing_then("transient index error", vec![Document::new("4.2M", "q3.pdf")]);
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();

        let state =
            retrieve_documents(TurnState::new("quarterly numbers"), &retriever, &registry, &config)
                .await;
        assert_eq!(state.error.as_ref().unwrap().node, "retrieveDocuments");

        let state = retrieve_documents(state, &retriever, &registry, &config).await;
        assert!(state.error.is_none());
        assert_eq!(state.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_successful_retrieval_keeps_other_node_errors() {
        let retriever = ScriptedRetriever::always(vec![Document::new("4.2M", "q3.pdf")]);
        let registry = FixedRegistry::empty();
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("quarterly numbers");
        state.error = Some(NodeError::new("generateResponse", "model offline"));

        let state = retrieve_documents(state, &retriever, &registry, &config).await;

        assert_eq!(state.error.unwrap().node, "generateResponse");
    }
}
