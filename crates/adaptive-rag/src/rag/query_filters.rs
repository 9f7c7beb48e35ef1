//! Document-scoping filters derived from the query text.
//!
//! Stages run in order and may short-circuit:
//! 1. contextual reference ("this document") reuses the sticky filter
//! 2. an explicit filename is validated against the registry, or a
//!    "latest document" cue sets the recency sentinel
//! 3. broad key-term lookup against the registry
//! 4. content-type and recency hints, only when no source filter exists
//!
//! A source filter always wins over content-type and recency hints.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::collaborators::{DocumentRegistry, RegistryMatch};
use crate::config::OrchestratorConfig;
use crate::error::{RagError, RagResult};
use crate::fuzzy::name_similarity;
use crate::timeout::with_timeout;
use crate::types::{
    DocumentFilter, QueryFilters, CONTENT_TYPE_KEY, LATEST_KEY, PARSED_AT_FIELD, SORT_BY_KEY,
    SORT_DIRECTION_KEY, SOURCE_KEY,
};

static CONTEXT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:in|from|of|about)\s+)?(?:this|that)\s+(?:document|doc|file|presentation|deck|pdf|report)\b|\bit\s+says\b",
    )
    .expect("context reference regex is valid")
});

static QUOTED_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["'“‘]([^"'“”‘’]+?\.(?:pdf|docx|pptx))["'”’]"#)
        .expect("quoted filename regex is valid")
});

/// A filename with up to three preceding words, so "Annual Report 2024.pdf" survives.
static SPACED_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:[\w\-()]+\s+){0,3}[\w\-()]+\.(?:pdf|docx|pptx)\b")
        .expect("spaced filename regex is valid")
});

static TIGHT_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\w\-()]+\.(?:pdf|docx|pptx)\b").expect("tight filename regex is valid")
});

static LATEST_DOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:the\s+)?(?:latest|newest|most\s+recent)\s+(?:uploaded\s+)?(?:documents?|files?|pdfs?)\b",
    )
    .expect("latest document regex is valid")
});

static RECENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:latest|newest|most\s+recent|recently|recent)\b")
        .expect("recency regex is valid")
});

static CONTENT_TYPE_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bpdfs?\b", "application/pdf"),
        (
            r"(?i)\b(?:word\s+documents?|docx)\b",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        (
            r"(?i)\b(?:presentations?|slides?|slide\s+decks?|pptx|powerpoints?)\b",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ),
    ]
    .into_iter()
    .map(|(p, mime)| (Regex::new(p).expect("content type regex is valid"), mime))
    .collect()
});

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "check",
        "compare", "could", "describe", "did", "do", "does", "doc", "document", "documents",
        "explain", "file", "files", "find", "for", "from", "get", "give", "has", "have", "how",
        "i", "in", "info", "information", "into", "is", "it", "its", "list", "me", "my", "of",
        "on", "open", "or", "our", "please", "read", "say", "says", "show", "summarise",
        "summarize", "summary", "tell", "than", "that", "the", "their", "there", "these", "this",
        "those", "to", "us", "want", "was", "we", "were", "what", "when", "where", "which", "who",
        "why", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Output of filter extraction for one retrieval pass.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilterResult {
    pub query_filters: QueryFilters,
    /// Query to send to the retriever (referring phrases removed).
    pub cleaned_query: String,
    pub active_document_filter: Option<DocumentFilter>,
    pub new_explicit_filter_set: bool,
}

/// Where stage 2 left things.
enum ExplicitOutcome {
    Accepted(DocumentFilter, bool),
    Rejected,
    Latest(String),
    NoCue,
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_phrase(query: &str, re: &Regex) -> String {
    let stripped = collapse_whitespace(&re.replace_all(query, " "));
    let stripped = stripped.trim_matches(|c: char| c == ',' || c.is_whitespace());
    if stripped.chars().any(char::is_alphanumeric) {
        stripped.to_string()
    } else {
        query.trim().to_string()
    }
}

/// Filename candidates, most specific first and de-duplicated.
pub fn filename_candidates(query: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !candidates.iter().any(|c| c.eq_ignore_ascii_case(candidate)) {
            candidates.push(candidate.to_string());
        }
    };

    for caps in QUOTED_FILENAME_RE.captures_iter(query) {
        if let Some(m) = caps.get(1) {
            push(m.as_str());
        }
    }

    for m in SPACED_FILENAME_RE.find_iter(query) {
        let words: Vec<&str> = m.as_str().split_whitespace().collect();
        let first_kept = words
            .iter()
            .position(|w| !STOP_WORDS.contains(w.to_lowercase().as_str()))
            .unwrap_or(words.len().saturating_sub(1));
        push(&words[first_kept..].join(" "));
    }

    for m in TIGHT_FILENAME_RE.find_iter(query) {
        push(m.as_str());
    }

    candidates
}

/// Lowercased, stop-word-free terms longer than two characters, first occurrence order.
pub fn extract_key_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() > 2 && !STOP_WORDS.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn content_type_hint(query: &str) -> Option<&'static str> {
    CONTENT_TYPE_RULES
        .iter()
        .find(|(re, _)| re.is_match(query))
        .map(|(_, mime)| *mime)
}

async fn registry_lookup(
    registry: &dyn DocumentRegistry,
    search_term: &str,
    config: &OrchestratorConfig,
) -> RagResult<Vec<RegistryMatch>> {
    with_timeout("registry lookup", config.timeouts.call_ms, async {
        registry
            .find_document_by_name(search_term, false)
            .await
            .map_err(|e| RagError::RegistryLookup(e.to_string()))
    })
    .await
}

/// Highest registry similarity first; the fuzzy matcher breaks ties.
fn best_registry_match(candidate: &str, mut matches: Vec<RegistryMatch>) -> Option<RegistryMatch> {
    matches.sort_by(|a, b| {
        b.similarity.total_cmp(&a.similarity).then_with(|| {
            name_similarity(candidate, &b.filename).total_cmp(&name_similarity(candidate, &a.filename))
        })
    });
    matches.into_iter().next()
}

async fn explicit_filename_stage(
    query: &str,
    prior: Option<&DocumentFilter>,
    registry: &dyn DocumentRegistry,
    config: &OrchestratorConfig,
) -> RagResult<ExplicitOutcome> {
    let candidates = filename_candidates(query);

    if candidates.is_empty() {
        if LATEST_DOC_RE.is_match(query) {
            return Ok(ExplicitOutcome::Latest(strip_phrase(query, &LATEST_DOC_RE)));
        }
        return Ok(ExplicitOutcome::NoCue);
    }

    for candidate in &candidates {
        let matches = registry_lookup(registry, candidate, config).await?;
        let Some(top) = best_registry_match(candidate, matches) else {
            tracing::debug!(candidate = %candidate, "No registry hit for filename candidate");
            continue;
        };

        if top.similarity < config.thresholds.explicit_match {
            tracing::debug!(
                candidate = %candidate,
                best = %top.filename,
                similarity = top.similarity,
                "Filename candidate below explicit threshold"
            );
            continue;
        }

        if let Some(existing) = prior.filter(|p| p.source == top.filename) {
            return Ok(ExplicitOutcome::Accepted(existing.clone(), false));
        }

        let filter = DocumentFilter::new(
            top.filename.clone(),
            format!(
                "explicit filename '{}' matched '{}' (similarity {:.2})",
                candidate, top.filename, top.similarity
            ),
        );
        return Ok(ExplicitOutcome::Accepted(filter, true));
    }

    Ok(ExplicitOutcome::Rejected)
}

async fn broad_registry_stage(
    query: &str,
    registry: &dyn DocumentRegistry,
    config: &OrchestratorConfig,
) -> RagResult<Option<DocumentFilter>> {
    let terms = extract_key_terms(query);
    if terms.is_empty() {
        return Ok(None);
    }
    let search_term = terms.join(" ");
    let matches = registry_lookup(registry, &search_term, config).await?;
    if matches.is_empty() {
        return Ok(None);
    }

    let numeric: Vec<&String> = terms
        .iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .collect();
    let with_numbers: Vec<RegistryMatch> = matches
        .iter()
        .filter(|m| {
            let name = m.filename.to_lowercase();
            numeric.iter().all(|n| name.contains(n.as_str()))
        })
        .cloned()
        .collect();
    let pool = if with_numbers.is_empty() { matches } else { with_numbers };

    let Some(best) = best_registry_match(&search_term, pool) else {
        return Ok(None);
    };
    if best.similarity < config.thresholds.broad_match {
        tracing::debug!(
            terms = %search_term,
            best = %best.filename,
            similarity = best.similarity,
            "Broad registry match below threshold"
        );
        return Ok(None);
    }

    Ok(Some(DocumentFilter::new(
        best.filename.clone(),
        format!(
            "registry terms '{}' matched '{}' (similarity {:.2})",
            search_term, best.filename, best.similarity
        ),
    )))
}

/// Derive the retrieval filter for `query`. Never fails: registry errors
/// fall back to the filter state the stage started with.
pub async fn extract_query_filters(
    query: &str,
    prior: Option<&DocumentFilter>,
    refinement_count: u32,
    registry: &dyn DocumentRegistry,
    config: &OrchestratorConfig,
) -> QueryFilterResult {
    let mut cleaned_query = query.trim().to_string();
    let mut active: Option<DocumentFilter> = prior.cloned();
    let mut new_explicit = false;
    let mut query_filters = QueryFilters::new();

    // Stage 1: contextual reference.
    if CONTEXT_REF_RE.is_match(query) {
        match prior {
            Some(filter) => {
                tracing::info!(source = %filter.source, "Contextual reference, reusing active document filter");
                let mut filters = QueryFilters::new();
                filters.insert(SOURCE_KEY.to_string(), Value::String(filter.source.clone()));
                return QueryFilterResult {
                    query_filters: filters,
                    cleaned_query: strip_phrase(query, &CONTEXT_REF_RE),
                    active_document_filter: Some(filter.clone()),
                    new_explicit_filter_set: false,
                };
            }
            None => {
                tracing::debug!("Contextual reference without an active filter");
                active = None;
            }
        }
    }

    // Stage 2: explicit filename or recency sentinel.
    let entry_state = active.clone();
    let mut latest_sentinel = false;
    let mut explicit_rejected = false;
    match explicit_filename_stage(query, active.as_ref(), registry, config).await {
        Ok(ExplicitOutcome::Accepted(filter, is_new)) => {
            tracing::info!(
                source = %filter.source,
                new_filter = is_new,
                "Explicit filename validated against registry"
            );
            active = Some(filter);
            new_explicit = is_new;
        }
        Ok(ExplicitOutcome::Rejected) => {
            tracing::info!("Filename in query failed registry validation, clearing document filter");
            active = None;
            explicit_rejected = true;
        }
        Ok(ExplicitOutcome::Latest(stripped)) => {
            tracing::info!("Recency cue detected, targeting latest document");
            query_filters.insert(LATEST_KEY.to_string(), Value::Bool(true));
            cleaned_query = stripped;
            active = None;
            latest_sentinel = true;
        }
        Ok(ExplicitOutcome::NoCue) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Explicit filename stage failed, keeping entry filter state");
            active = entry_state;
            new_explicit = false;
        }
    }

    // Stage 3: broad registry lookup. Skipped on refinement passes so a
    // model-written query cannot re-scope the conversation.
    if active.is_none() && !latest_sentinel && !explicit_rejected && refinement_count == 0 {
        match broad_registry_stage(query, registry, config).await {
            Ok(Some(filter)) => {
                tracing::info!(source = %filter.source, reason = %filter.filter_applied, "Broad registry match");
                active = Some(filter);
                new_explicit = true;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Broad registry lookup failed"),
        }
    }

    // Stage 4: weaker hints, only without a source filter.
    match &active {
        Some(filter) => {
            query_filters.remove(LATEST_KEY);
            query_filters.insert(SOURCE_KEY.to_string(), Value::String(filter.source.clone()));
        }
        None => {
            if let Some(mime) = content_type_hint(query) {
                query_filters.insert(CONTENT_TYPE_KEY.to_string(), Value::String(mime.to_string()));
            }
            if RECENCY_RE.is_match(query) {
                query_filters.insert(SORT_BY_KEY.to_string(), Value::String(PARSED_AT_FIELD.to_string()));
                query_filters.insert(SORT_DIRECTION_KEY.to_string(), Value::String("desc".to_string()));
            }
        }
    }

    tracing::debug!(
        filters = ?query_filters,
        cleaned_query = %cleaned_query,
        new_explicit_filter_set = new_explicit,
        "Query filters extracted"
    );

    QueryFilterResult {
        query_filters,
        cleaned_query,
        active_document_filter: active,
        new_explicit_filter_set: new_explicit,
    }
}
