//! Retrieval quality evaluation.
//!
//! The model grades the retrieved passages 0-10. Any failure grades them a
//! neutral 5 with `should_refine` off; the edge out of this node still
//! compares the score against the pass mark, so a failed grading can cost
//! at most the turn's refinement budget.

use crate::config::OrchestratorConfig;
use crate::error::{RagError, RagResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::rag::prompts::{format_documents, render_prompt, EVALUATION_PROMPT};
use crate::rag::structured_output::{bool_field, extract_json_object, number_field, string_field};
use crate::timeout::with_timeout;
use crate::types::{QualityAssessment, TurnState};

const FALLBACK_SCORE: f32 = 5.0;

async fn assess(
    state: &TurnState,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> RagResult<QualityAssessment> {
    let documents = state.documents.clone();
    let query = state.query.clone();
    let snippet_chars = config.limits.doc_snippet_chars;
    let prompt = render_prompt("format evaluation prompt", config.timeouts.format_ms, move || {
        EVALUATION_PROMPT
            .replace("{documents}", &format_documents(&documents, snippet_chars))
            .replace("{query}", &query)
    })
    .await?;
    let messages = vec![ChatMessage::user(prompt)];

    let completion = with_timeout("evaluate retrieval quality", config.timeouts.call_ms, async {
        model
            .invoke(&messages)
            .await
            .map_err(|e| RagError::ModelInvocation(e.to_string()))
    })
    .await?;

    let obj = extract_json_object(&completion.content)?;
    let quality_score = number_field(&obj, "quality_score")
        .map(|n| (n as f32).clamp(0.0, 10.0))
        .unwrap_or(FALLBACK_SCORE);
    let should_refine =
        bool_field(&obj, "should_refine").unwrap_or(quality_score < config.thresholds.quality_pass);

    Ok(QualityAssessment {
        quality_score,
        reasoning: string_field(&obj, "reasoning").unwrap_or_default(),
        should_refine,
    })
}

pub async fn evaluate_retrieval_quality(
    mut state: TurnState,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> TurnState {
    let assessment = if state.documents.is_empty() {
        tracing::info!(query = %state.query, "No documents retrieved, skipping evaluation");
        QualityAssessment {
            quality_score: 0.0,
            reasoning: "no documents were retrieved".to_string(),
            should_refine: true,
        }
    } else {
        match assess(&state, model, config).await {
            Ok(assessment) => {
                tracing::info!(
                    score = assessment.quality_score,
                    should_refine = assessment.should_refine,
                    reasoning = %assessment.reasoning,
                    "Retrieval quality evaluated"
                );
                assessment
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    timed_out = e.is_timeout(),
                    "Quality evaluation failed, using neutral score"
                );
                QualityAssessment {
                    quality_score: FALLBACK_SCORE,
                    reasoning: format!("evaluation unavailable: {}", e),
                    should_refine: false,
                }
            }
        }
    };

    state.retrieval_quality = assessment.quality_score;
    state.assessment = Some(assessment);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChatModel;
    use crate::types::Document;

    fn state_with_docs() -> TurnState {
        let mut state = TurnState::new("What was Q3 revenue?");
        state.documents = vec![Document::new("Q3 revenue was $4.2M", "q3.pdf")];
        state
    }

    #[tokio::test]
    async fn test_empty_documents_short_circuit() {
        let model = ScriptedChatModel::new([r#"{"quality_score": 9}"#]);
        let config = OrchestratorConfig::default();

        let state = evaluate_retrieval_quality(TurnState::new("anything"), &model, &config).await;

        assert_eq!(state.retrieval_quality, 0.0);
        assert!(state.assessment.unwrap().should_refine);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_parses_model_verdict() {
        let model = ScriptedChatModel::new([
            r#"Verdict: {"quality_score": 8, "reasoning": "states the figure", "should_refine": false}"#,
        ]);
        let config = OrchestratorConfig::default();

        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;

        assert_eq!(state.retrieval_quality, 8.0);
        let assessment = state.assessment.unwrap();
        assert_eq!(assessment.reasoning, "states the figure");
        assert!(!assessment.should_refine);

        let prompt = &model.requests()[0][0].content;
        assert!(prompt.contains("What was Q3 revenue?"));
        assert!(prompt.contains("(source: q3.pdf)"));
    }

    #[tokio::test]
    async fn test_missing_fields_use_defaults() {
        let config = OrchestratorConfig::default();

        let model = ScriptedChatModel::new([r#"{"reasoning": "unsure"}"#]);
        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;
        assert_eq!(state.retrieval_quality, 5.0);
        assert!(state.assessment.unwrap().should_refine);

        let model = ScriptedChatModel::new([r#"{"quality_score": "high", "should_refine": "no"}"#]);
        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;
        assert_eq!(state.retrieval_quality, 5.0);
        assert!(state.assessment.unwrap().should_refine);

        let model = ScriptedChatModel::new([r#"{"quality_score": 7}"#]);
        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;
        assert!(!state.assessment.unwrap().should_refine);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_neutral() {
        let model = ScriptedChatModel::new(["The passages look fine to me."]);
        let config = OrchestratorConfig::default();

        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;

        assert_eq!(state.retrieval_quality, 5.0);
        assert!(!state.assessment.unwrap().should_refine);
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_neutral() {
        let model = ScriptedChatModel::new([r#"{"quality_score": 1}"#]).with_delay_ms(60_000);
        let config = OrchestratorConfig::default();

        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;

        assert_eq!(state.retrieval_quality, 5.0);
        assert!(!state.assessment.unwrap().should_refine);
    }

    #[tokio::test]
    async fn test_score_is_clamped() {
        let model = ScriptedChatModel::new([r#"{"quality_score": 42}"#]);
        let config = OrchestratorConfig::default();

        let state = evaluate_retrieval_quality(state_with_docs(), &model, &config).await;

        assert_eq!(state.retrieval_quality, 10.0);
    }
}
