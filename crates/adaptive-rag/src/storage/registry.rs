use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::collaborators::{DocumentRegistry, RegistryMatch};
use crate::fuzzy::name_similarity;

/// Matches below this are not worth returning at all.
const MIN_REPORTED_SIMILARITY: f64 = 0.1;

/// Filename registry kept in memory, scored with the fuzzy name matcher.
#[derive(Default)]
pub struct InMemoryDocumentRegistry {
    filenames: RwLock<Vec<String>>,
}

impl InMemoryDocumentRegistry {
    pub fn new<I, S>(filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filenames: RwLock::new(filenames.into_iter().map(Into::into).collect()),
        }
    }

    pub fn register(&self, filename: impl Into<String>) {
        let filename = filename.into();
        let mut names = self.filenames.write();
        if !names.contains(&filename) {
            names.push(filename);
        }
    }

    pub fn len(&self) -> usize {
        self.filenames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.read().is_empty()
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryDocumentRegistry {
    async fn find_document_by_name(
        &self,
        search_term: &str,
        exact_match: bool,
    ) -> Result<Vec<RegistryMatch>> {
        let term = search_term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let names = self.filenames.read();
        let matches: Vec<RegistryMatch> = if exact_match {
            names
                .iter()
                .filter(|name| name.eq_ignore_ascii_case(term))
                .map(|name| RegistryMatch {
                    filename: name.clone(),
                    similarity: 1.0,
                })
                .collect()
        } else {
            names
                .iter()
                .map(|name| RegistryMatch {
                    filename: name.clone(),
                    similarity: name_similarity(term, name),
                })
                .filter(|m| m.similarity >= MIN_REPORTED_SIMILARITY)
                .collect()
        };

        tracing::debug!(search_term = %term, exact_match, hits = matches.len(), "Registry lookup");
        Ok(matches)
    }
}
