//! Scripted collaborators for unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collaborators::{
    DocumentRegistry, RegistryMatch, RetrievalOptions, RetrievalOutput, Retriever,
};
use crate::llm::{ChatCompletion, ChatMessage, ChatModel, ModelId};
use crate::rag::prompts::{EVALUATION_PROMPT, REFINEMENT_PROMPT, ROUTING_PROMPT};
use crate::types::Document;

/// Pop the front while more than one item remains, then keep repeating it.
fn next_or_last<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn leading_line(prompt: &str) -> &str {
    prompt.lines().next().unwrap_or(prompt)
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync>;

/// Chat model that replies from a script instead of a provider.
pub struct ScriptedChatModel {
    model_id: ModelId,
    responder: Responder,
    delay_ms: u64,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChatModel {
    /// Replies in order; the last reply repeats once the script runs out.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(replies.into_iter().map(Into::into).collect());
        Self::from_fn(move |_| {
            next_or_last(&mut queue.lock()).ok_or_else(|| anyhow!("script exhausted"))
        })
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            model_id: ModelId {
                provider: crate::llm::ApiProvider::Custom {
                    name: "scripted".to_string(),
                },
                model: "test".to_string(),
            },
            responder: Box::new(f),
            delay_ms: 0,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::from_fn(move |_| Err(anyhow!("{}", message)))
    }

    /// Answers each graph node by recognising its prompt: the route for the
    /// router, scripted scores for the evaluator, scripted rewrites for the
    /// refiner and `answer` for everything else. Scores and rewrites repeat
    /// their last entry.
    pub fn for_nodes(route: &str, scores: &[f32], rewrites: &[&str], answer: &str) -> Self {
        let route = route.to_string();
        let answer = answer.to_string();
        let scores: Mutex<VecDeque<f32>> = Mutex::new(scores.iter().copied().collect());
        let rewrites: Mutex<VecDeque<String>> =
            Mutex::new(rewrites.iter().map(|r| r.to_string()).collect());

        Self::from_fn(move |messages| {
            let first = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
            if first == ROUTING_PROMPT {
                return Ok(route.clone());
            }
            if first.starts_with(leading_line(EVALUATION_PROMPT)) {
                let score = next_or_last(&mut scores.lock())
                    .ok_or_else(|| anyhow!("no evaluation scores scripted"))?;
                return Ok(format!(r#"{{"quality_score": {}}}"#, score));
            }
            if first.starts_with(leading_line(REFINEMENT_PROMPT)) {
                let rewrite = next_or_last(&mut rewrites.lock())
                    .ok_or_else(|| anyhow!("no rewrites scripted"))?;
                return Ok(format!(r#"{{"refined_query": "{}", "reasoning": "scripted"}}"#, rewrite));
            }
            Ok(answer.clone())
        })
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every message list the model was invoked with, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(messages.to_vec());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let content = (self.responder)(messages)?;
        Ok(ChatCompletion { content })
    }

    fn model_id(&self) -> &ModelId {
        &self.model_id
    }
}

/// Registry returning fixed matches for every search, or failing.
pub struct FixedRegistry {
    matches: Vec<RegistryMatch>,
    fail: bool,
    searches: Mutex<Vec<String>>,
}

impl FixedRegistry {
    pub fn new(matches: &[(&str, f64)]) -> Self {
        Self {
            matches: matches
                .iter()
                .map(|(filename, similarity)| RegistryMatch {
                    filename: filename.to_string(),
                    similarity: *similarity,
                })
                .collect(),
            fail: false,
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().clone()
    }
}

#[async_trait]
impl DocumentRegistry for FixedRegistry {
    async fn find_document_by_name(
        &self,
        search_term: &str,
        _exact_match: bool,
    ) -> Result<Vec<RegistryMatch>> {
        self.searches.lock().push(search_term.to_string());
        if self.fail {
            return Err(anyhow!("registry credentials missing"));
        }
        Ok(self.matches.clone())
    }
}

/// Retriever that replays a list of results, repeating the last one.
pub struct ScriptedRetriever {
    results: Mutex<VecDeque<Result<RetrievalOutput, String>>>,
    calls: Mutex<Vec<(String, RetrievalOptions)>>,
}

impl ScriptedRetriever {
    pub fn new(results: Vec<Vec<Document>>) -> Self {
        Self {
            results: Mutex::new(
                results
                    .into_iter()
                    .map(|docs| Ok(RetrievalOutput { documents: Some(docs) }))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(documents: Vec<Document>) -> Self {
        Self::new(vec![documents])
    }

    pub fn missing_documents() -> Self {
        Self {
            results: Mutex::new(VecDeque::from([Ok(RetrievalOutput { documents: None })])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            results: Mutex::new(VecDeque::from([Err(message.to_string())])),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first call, then keeps returning `documents`.
    pub fn failing_then(message: &str, documents: Vec<Document>) -> Self {
        Self {
            results: Mutex::new(VecDeque::from([
                Err(message.to_string()),
                Ok(RetrievalOutput {
                    documents: Some(documents),
                }),
            ])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, RetrievalOptions)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn invoke(&self, query: &str, options: RetrievalOptions) -> Result<RetrievalOutput> {
        self.calls.lock().push((query.to_string(), options));
        match next_or_last(&mut self.results.lock()) {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!("{}", message)),
            None => Ok(RetrievalOutput::default()),
        }
    }
}
