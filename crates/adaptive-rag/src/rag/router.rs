//! Query router: does this message need document retrieval at all?
//!
//! Cheap pattern rules run first; the chat model is only consulted for
//! messages the rules cannot settle.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::OrchestratorConfig;
use crate::error::{RagError, RagResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::rag::prompts::ROUTING_PROMPT;
use crate::timeout::with_timeout;
use crate::types::Route;

static SMALL_TALK_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(hi|hello|hey|hiya|howdy|greetings|good\s+(morning|afternoon|evening))(\s+there)?\s*[!.?]*\s*$",
        r"(?i)^\s*(thanks|thank\s+you|thx|cheers|ok|okay|bye|goodbye)(\s+(so\s+much|a\s+lot|very\s+much))?\s*[!.?]*\s*$",
        r"(?i)^\s*(what\s+can\s+you\s+do|who\s+are\s+you|what\s+are\s+you|how\s+are\s+you|help)\s*[!.?]*\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("small talk regex is valid"))
    .collect()
});

static DOC_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)pdf|doc|presentation|file|slide").expect("document keyword regex is valid")
});

/// Pattern-only routing. `None` means the model has to decide.
pub fn classify_by_rules(query: &str) -> Option<Route> {
    if SMALL_TALK_RES.iter().any(|re| re.is_match(query)) {
        return Some(Route::Direct);
    }

    let token_count = query.split_whitespace().count();
    if token_count <= 2 && !query.contains('.') && !DOC_KEYWORD_RE.is_match(query) {
        return Some(Route::Direct);
    }

    None
}

/// Read a route out of the model's reply; anything without "direct" retrieves.
fn parse_route(reply: &str) -> Route {
    if reply.to_lowercase().contains("direct") {
        Route::Direct
    } else {
        Route::Retrieve
    }
}

async fn route_with_model(
    query: &str,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> RagResult<Route> {
    let messages = vec![ChatMessage::system(ROUTING_PROMPT), ChatMessage::user(query)];

    let completion = with_timeout("route query", config.timeouts.call_ms, async {
        model
            .invoke(&messages)
            .await
            .map_err(|e| RagError::ModelInvocation(e.to_string()))
    })
    .await?;

    Ok(parse_route(&completion.content))
}

/// Decide between retrieval and a direct answer. Never fails.
pub async fn check_query_type(
    query: &str,
    model: &dyn ChatModel,
    config: &OrchestratorConfig,
) -> Route {
    if let Some(route) = classify_by_rules(query) {
        tracing::info!(route = ?route, "Query routed by pattern rules");
        return route;
    }

    match route_with_model(query, model, config).await {
        Ok(route) => {
            tracing::info!(route = ?route, model = %model.model_id(), "Query routed by model");
            route
        }
        Err(e) => {
            let route = if DOC_KEYWORD_RE.is_match(query) {
                Route::Retrieve
            } else {
                Route::Direct
            };
            tracing::warn!(
                error = %e,
                timed_out = e.is_timeout(),
                fallback = ?route,
                "Routing call failed, using fallback route"
            );
            route
        }
    }
}
