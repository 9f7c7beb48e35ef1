use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::collaborators::{RetrievalOptions, RetrievalOutput, Retriever};
use crate::types::{
    Document, QueryFilters, LATEST_KEY, PARSED_AT_FIELD, SORT_BY_KEY, SORT_DIRECTION_KEY,
};

/// Keyword-overlap retriever over a fixed set of chunks.
///
/// Understands the filter vocabulary the orchestrator emits: `metadata.*`
/// equality, `__LATEST__` (newest parsed source only) and
/// `sortBy`/`sortDirection`.
pub struct StaticRetriever {
    documents: Vec<Document>,
    top_k: usize,
}

impl StaticRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents, top_k: 5 }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    fn matches_metadata(doc: &Document, filter: &QueryFilters) -> bool {
        filter.iter().all(|(key, expected)| match key.strip_prefix("metadata.") {
            Some(field) => doc.metadata.get(field) == Some(expected),
            None => true,
        })
    }

    fn latest_source(docs: &[&Document]) -> Option<String> {
        docs.iter()
            .filter_map(|d| Some((d.parsed_at()?, d.source()?)))
            .max_by(|a, b| a.0.cmp(b.0))
            .map(|(_, source)| source.to_string())
    }
}

fn overlap_score(query_terms: &HashSet<String>, content: &str) -> usize {
    let lower = content.to_lowercase();
    query_terms.iter().filter(|t| lower.contains(t.as_str())).count()
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn invoke(&self, query: &str, options: RetrievalOptions) -> Result<RetrievalOutput> {
        let filter = options.filter.unwrap_or_default();

        let mut candidates: Vec<&Document> = self
            .documents
            .iter()
            .filter(|d| Self::matches_metadata(d, &filter))
            .collect();

        if filter.get(LATEST_KEY) == Some(&Value::Bool(true)) {
            if let Some(latest) = Self::latest_source(&candidates) {
                candidates.retain(|d| d.source() == Some(latest.as_str()));
            }
        }

        let terms: HashSet<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();

        let mut scored: Vec<(usize, &Document)> = candidates
            .into_iter()
            .map(|d| (overlap_score(&terms, &d.content), d))
            .filter(|(score, _)| *score > 0)
            .collect();

        let sort_by_parsed = filter.get(SORT_BY_KEY).and_then(Value::as_str) == Some(PARSED_AT_FIELD);
        let descending = filter.get(SORT_DIRECTION_KEY).and_then(Value::as_str) != Some("asc");
        scored.sort_by(|a, b| {
            if sort_by_parsed {
                let ord = a.1.parsed_at().cmp(&b.1.parsed_at());
                let ord = if descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            b.0.cmp(&a.0)
        });

        let documents: Vec<Document> = scored
            .into_iter()
            .take(self.top_k)
            .map(|(_, d)| d.clone())
            .collect();

        tracing::debug!(
            query = %query,
            filter = ?filter,
            new_explicit_filter_set = options.new_explicit_filter_set,
            hits = documents.len(),
            "Static retrieval"
        );
        Ok(RetrievalOutput {
            documents: Some(documents),
        })
    }
}
