//! Final answer generation, grounded or direct.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::OrchestratorConfig;
use crate::error::{NodeError, RagError, RagResult};
use crate::graph::Node;
use crate::llm::{ChatMessage, ChatModel};
use crate::rag::prompts::{format_documents, DIRECT_ANSWER_SYSTEM, GROUNDED_SYSTEM, NO_RESULTS_SYSTEM};
use crate::timeout::with_timeout;
use crate::types::TurnState;

pub const GENERATION_APOLOGY: &str = "I'm sorry, I ran into a problem while writing the answer. \
Please try asking again in a moment.";

static CANNED_REPLIES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)^\s*(hi|hello|hey|hiya|howdy|greetings|good\s+(morning|afternoon|evening))\b",
            "Hello! I can answer questions about your uploaded documents. What would you like to know?",
        ),
        (
            r"(?i)\b(thanks|thank\s+you|thx|cheers)\b",
            "You're welcome! Let me know if there's anything else you'd like to find in your documents.",
        ),
        (
            r"(?i)\bhow\s+are\s+you\b",
            "I'm doing well, thanks for asking. How can I help with your documents today?",
        ),
        (
            r"(?i)\b(what\s+can\s+you\s+do|help)\b",
            "I answer questions about your uploaded documents. Name a file to focus on it, \
or ask for the latest documents to see what was added most recently.",
        ),
    ]
    .into_iter()
    .map(|(p, reply)| (Regex::new(p).expect("canned reply regex is valid"), reply))
    .collect()
});

const GENERIC_APOLOGY: &str = "I'm sorry, I can't respond right now. Please try again in a moment.";

/// Offline reply for when the model is unreachable.
pub fn canned_reply(query: &str) -> &'static str {
    CANNED_REPLIES
        .iter()
        .find(|(re, _)| re.is_match(query))
        .map(|(_, reply)| *reply)
        .unwrap_or(GENERIC_APOLOGY)
}

async fn complete(
    operation: &str,
    timeout_ms: u64,
    messages: Vec<ChatMessage>,
    model: &dyn ChatModel,
) -> RagResult<String> {
    let completion = with_timeout(operation, timeout_ms, async {
        model
            .invoke(&messages)
            .await
            .map_err(|e| RagError::ModelInvocation(e.to_string()))
    })
    .await?;
    Ok(completion.content.trim().to_string())
}

pub async fn direct_answer(
    mut state: TurnState,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> TurnState {
    let messages = std::iter::once(ChatMessage::system(DIRECT_ANSWER_SYSTEM))
        .chain(state.context_messages.iter().cloned())
        .chain(std::iter::once(ChatMessage::user(state.user_message.clone())))
        .collect();

    match complete("direct answer", config.timeouts.call_ms, messages, model).await {
        Ok(answer) => {
            tracing::debug!(chars = answer.len(), "Direct answer generated");
            state.answer = Some(answer);
        }
        Err(e) => {
            state.answer = Some(canned_reply(&state.user_message).to_string());
            state.record_error(NodeError::from_error(Node::DirectAnswer.as_str(), &e));
        }
    }
    state
}

pub async fn generate_response(
    mut state: TurnState,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> TurnState {
    let context = format_documents(&state.documents, config.limits.doc_snippet_chars);
    let exhausted = state.refinement_count >= config.limits.max_refinements
        && (state.documents.is_empty() || context.chars().count() < config.limits.min_context_chars);

    let system = if exhausted {
        tracing::info!(
            refinements = state.refinement_count,
            "No usable documents after refinement, answering with suggestions"
        );
        NO_RESULTS_SYSTEM.to_string()
    } else {
        GROUNDED_SYSTEM.replace("{context}", &context)
    };

    let recent = state
        .context_messages
        .len()
        .saturating_sub(config.limits.max_context_messages);
    let messages = std::iter::once(ChatMessage::system(system))
        .chain(state.context_messages[recent..].iter().cloned())
        .chain(std::iter::once(ChatMessage::user(state.user_message.clone())))
        .collect();

    match complete("generate response", config.timeouts.generation_ms, messages, model).await {
        Ok(answer) => {
            tracing::info!(
                documents = state.documents.len(),
                chars = answer.len(),
                "Response generated"
            );
            state.answer = Some(answer);
        }
        Err(e) => {
            state.answer = Some(GENERATION_APOLOGY.to_string());
            state.record_error(NodeError::from_error(Node::GenerateResponse.as_str(), &e));
        }
    }
    state
}
