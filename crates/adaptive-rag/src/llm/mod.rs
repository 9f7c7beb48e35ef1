//! Chat-completion model seam.
//!
//! The orchestrator only needs "send messages, get text back". Models are
//! addressed by a `provider/model-name` identifier; [`ExternalChatModel`]
//! covers the hosted APIs, tests plug in scripted implementations.

use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod external;

pub use external::ExternalChatModel;

/// External API providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    Anthropic,
    OpenRouter,
    Together,
    Groq,
    Ollama,
    Custom { name: String },
}

impl ApiProvider {
    fn from_prefix(prefix: &str) -> Self {
        match prefix.to_lowercase().as_str() {
            "openai" => Self::OpenAI,
            "anthropic" => Self::Anthropic,
            "openrouter" => Self::OpenRouter,
            "together" => Self::Together,
            "groq" => Self::Groq,
            "ollama" => Self::Ollama,
            other => Self::Custom {
                name: other.to_string(),
            },
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::OpenRouter => "openrouter",
            Self::Together => "together",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::Custom { name } => name,
        }
    }
}

/// `provider/model-name`, e.g. `openai/gpt-4o-mini`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelId {
    pub provider: ApiProvider,
    pub model: String,
}

impl ModelId {
    pub fn parse(id: &str) -> Result<Self> {
        let (provider, model) = id
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("model id '{}' must look like provider/model-name", id))?;
        if provider.is_empty() || model.is_empty() {
            return Err(anyhow!("model id '{}' has an empty provider or model", id));
        }
        Ok(Self {
            provider: ApiProvider::from_prefix(provider),
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.prefix(), self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub content: String,
}

/// Core trait for chat-completion providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one non-streaming completion over `messages`.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatCompletion>;

    fn model_id(&self) -> &ModelId;
}
