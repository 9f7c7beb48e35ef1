//! Query reformulation after a poor retrieval.

use crate::config::OrchestratorConfig;
use crate::error::{RagError, RagResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::rag::prompts::{
    format_documents, render_prompt, FIRST_ATTEMPT_STRATEGY, LATER_ATTEMPT_STRATEGY,
    REFINEMENT_PROMPT,
};
use crate::rag::structured_output::{extract_json_object, string_field};
use crate::timeout::with_timeout;
use crate::types::TurnState;

/// `None` means the reply parsed but carried no `refined_query`.
async fn rewrite(
    state: &TurnState,
    attempt: u32,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> RagResult<Option<String>> {
    let strategy = if attempt <= 1 {
        FIRST_ATTEMPT_STRATEGY
    } else {
        LATER_ATTEMPT_STRATEGY
    };
    let documents = state.documents.clone();
    let user_message = state.user_message.clone();
    let query = state.query.clone();
    let snippet_chars = config.limits.doc_snippet_chars;
    let prompt = render_prompt("format refinement prompt", config.timeouts.format_ms, move || {
        let documents = if documents.is_empty() {
            "(none)".to_string()
        } else {
            format_documents(&documents, snippet_chars)
        };
        REFINEMENT_PROMPT
            .replace("{documents}", &documents)
            .replace("{strategy}", strategy)
            .replace("{attempt}", &attempt.to_string())
            .replace("{original_query}", &user_message)
            .replace("{query}", &query)
    })
    .await?;
    let messages = vec![ChatMessage::user(prompt)];

    let completion = with_timeout("refine query", config.timeouts.call_ms, async {
        model
            .invoke(&messages)
            .await
            .map_err(|e| RagError::ModelInvocation(e.to_string()))
    })
    .await?;

    let obj = extract_json_object(&completion.content)?;
    if let Some(reasoning) = string_field(&obj, "reasoning") {
        tracing::debug!(reasoning = %reasoning, "Refiner reasoning");
    }
    Ok(string_field(&obj, "refined_query"))
}

pub async fn refine_query(
    mut state: TurnState,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> TurnState {
    let attempt = state.refinement_count + 1;

    let refined = match rewrite(&state, attempt, model, config).await {
        Ok(Some(query)) => query,
        Ok(None) => {
            tracing::warn!("Refiner reply had no refined_query, using template");
            format!("more information about {}", state.user_message)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Query refinement failed, using template");
            format!("detailed information about {}", state.query)
        }
    };

    tracing::info!(
        attempt,
        from = %state.query,
        to = %refined,
        "Query refined"
    );

    state.previous_documents = state.documents.clone();
    state.refinement_count = attempt;
    state.query = refined.clone();
    state.refined_query = Some(refined);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChatModel;
    use crate::types::Document;

    #[tokio::test]
    async fn test_uses_model_rewrite() {
        let model = ScriptedChatModel::new([
            r#"{"refined_query": "Q3 2024 revenue total", "reasoning": "more specific"}"#,
        ]);
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("how much did we make");
        state.documents = vec![Document::new("unrelated", "misc.pdf")];

        let state = refine_query(state, &model, &config).await;

        assert_eq!(state.query, "Q3 2024 revenue total");
        assert_eq!(state.refined_query.as_deref(), Some("Q3 2024 revenue total"));
        assert_eq!(state.refinement_count, 1);
        assert_eq!(state.previous_documents.len(), 1);
        assert_eq!(state.user_message, "how much did we make");
    }

    #[tokio::test]
    async fn test_missing_refined_query_uses_original() {
        let model = ScriptedChatModel::new([r#"{"reasoning": "no idea"}"#]);
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("staff count");
        state.query = "employee headcount".to_string();

        let state = refine_query(state, &model, &config).await;

        assert_eq!(state.query, "more information about staff count");
    }

    #[tokio::test]
    async fn test_failure_uses_current_query() {
        let model = ScriptedChatModel::failing("rate limited");
        let config = OrchestratorConfig::default();
        let mut state = TurnState::new("staff count");
        state.query = "employee headcount".to_string();
        state.refinement_count = 1;

        let state = refine_query(state, &model, &config).await;

        assert_eq!(state.query, "detailed information about employee headcount");
        assert_eq!(state.refinement_count, 2);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_later_attempts_ask_for_bigger_rewrites() {
        let model = ScriptedChatModel::new([r#"{"refined_query": "x"}"#]);
        let config = OrchestratorConfig::default();

        let state = refine_query(TurnState::new("first"), &model, &config).await;
        refine_query(state, &model, &config).await;

        let requests = model.requests();
        assert!(requests[0][0].content.contains(FIRST_ATTEMPT_STRATEGY));
        assert!(requests[0][0].content.contains("Attempt: 1"));
        assert!(requests[1][0].content.contains(LATER_ATTEMPT_STRATEGY));
        assert!(requests[1][0].content.contains("Attempt: 2"));
    }
}
