//! Prompt text for every model call the orchestrator makes.

use crate::error::{RagError, RagResult};
use crate::timeout::with_timeout;
use crate::types::Document;

pub const ROUTING_PROMPT: &str = "You are a query router for a document question-answering assistant. \
Decide whether the user's message needs a search over their uploaded documents.\n\n\
Answer \"retrieve\" when the message asks about facts, content, people, numbers or topics that could be \
in the user's documents, or mentions a document, file, report, presentation or slide.\n\
Answer \"direct\" for greetings, small talk, thanks, questions about the assistant itself, or requests \
that clearly need no documents.\n\n\
Reply with exactly one word: retrieve or direct.";

pub const EVALUATION_PROMPT: &str = "You are judging whether retrieved passages can answer a user's question.\n\n\
Question: \"{query}\"\n\n\
Retrieved passages:\n{documents}\n\n\
Score the passages from 0 (useless) to 10 (fully answers the question). \
Scores below 6 mean the search should be retried with a better query.\n\
Respond with ONLY a JSON object:\n\
{\"quality_score\": <0-10>, \"reasoning\": \"<one sentence>\", \"should_refine\": <true|false>}";

pub const REFINEMENT_PROMPT: &str = "You rewrite search queries for a document retrieval system. \
The current query did not find good passages.\n\n\
Original question: \"{original_query}\"\n\
Current query: \"{query}\"\n\
Attempt: {attempt}\n\n\
Passages the current query found:\n{documents}\n\n\
{strategy}\n\n\
Respond with ONLY a JSON object:\n\
{\"refined_query\": \"<new search query>\", \"reasoning\": \"<one sentence>\"}";

pub const FIRST_ATTEMPT_STRATEGY: &str = "Rephrase the query: use synonyms, add the key terms a document on this topic \
would contain, and drop filler words. Keep any filename exactly as written.";

pub const LATER_ATTEMPT_STRATEGY: &str = "The previous rewrite also failed. Rewrite the query dramatically: \
broaden it to the underlying topic, try different vocabulary entirely, or split out the single most \
important concept. Keep any filename exactly as written.";

pub const DIRECT_ANSWER_SYSTEM: &str = "You are a friendly assistant for a document question-answering app. \
Users upload documents (PDF, Word, PowerPoint) and ask questions about them. \
Reply conversationally and briefly to greetings, thanks and small talk. \
When asked what you can do, explain that you answer questions about uploaded documents, can focus on a \
specific file when the user names it, and can find the most recent documents. \
Do not invent document content.";

pub const GROUNDED_SYSTEM: &str = "You are an assistant that answers questions using ONLY the document \
excerpts below. Cite the source filename for the facts you use. If the excerpts do not contain the \
answer, say so plainly instead of guessing.\n\n\
Document excerpts:\n{context}";

pub const NO_RESULTS_SYSTEM: &str = "You are an assistant for a document question-answering app. \
Several searches found no relevant passages for the user's question. Apologize briefly, say that no \
matching content was found, and suggest what the user can do: rephrase the question, check that the \
filename is spelled correctly, or upload the document if it has not been added yet. \
Do not answer from general knowledge.";

/// Render passages as numbered blocks with their source filename.
pub fn format_documents(documents: &[Document], snippet_chars: usize) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let content: String = doc.content.trim().chars().take(snippet_chars).collect();
            format!(
                "[{}] (source: {})\n{}",
                i + 1,
                doc.source().unwrap_or("unknown"),
                content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render a prompt on the blocking pool under the formatting deadline.
///
/// Passage rendering grows with the retrieved set. On timeout the render
/// result is discarded when it eventually lands.
pub async fn render_prompt<F>(operation: &str, timeout_ms: u64, render: F) -> RagResult<String>
where
    F: FnOnce() -> String + Send + 'static,
{
    with_timeout(operation, timeout_ms, async {
        tokio::task::spawn_blocking(render)
            .await
            .map_err(|e| RagError::PromptFormat(e.to_string()))
    })
    .await
}
