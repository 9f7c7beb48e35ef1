//! Hosted chat-completion APIs over HTTP (OpenAI-compatible and Anthropic).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ApiProvider, ChatCompletion, ChatMessage, ChatModel, ChatRole, ModelId};

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

pub struct ExternalChatModel {
    model_id: ModelId,
    api_key: String,
    endpoint: String,
    max_tokens: usize,
    temperature: f32,
    client: Client,
}

impl ExternalChatModel {
    pub fn new(model_id: ModelId, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let endpoint = default_endpoint(&model_id.provider);
        tracing::info!(model = %model_id, endpoint = %endpoint, "Creating ExternalChatModel");

        Ok(Self {
            model_id,
            api_key,
            endpoint,
            max_tokens: 1024,
            temperature: 0.0,
            client,
        })
    }

    /// Build from a `provider/model-name` id, reading the key from the
    /// provider's usual environment variable. Ollama needs no key.
    pub fn from_env(model: &str) -> Result<Self> {
        let model_id = ModelId::parse(model)?;
        let api_key = match api_key_var(&model_id.provider) {
            Some(var) => std::env::var(var)
                .map_err(|_| anyhow!("{} is not set for model {}", var, model_id))?,
            None => String::new(),
        };
        Self::new(model_id, api_key)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// returned an HTML error page instead.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        if !status.is_success() {
            let preview: String = body.chars().take(300).collect();
            return Err(anyhow!("API error ({}) from {}: {}", status, endpoint, preview));
        }

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!("Failed to parse JSON from {} (HTTP {}): {}. Body: {}", endpoint, status, e, preview)
        })
    }

    async fn openai_compatible_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = json!({
            "model": self.model_id.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false
        });

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                anyhow!("Failed to connect to {}: {}", self.endpoint, e)
            } else {
                anyhow!("Request to {} failed: {}", self.endpoint, e)
            }
        })?;

        let result: OpenAIResponse = Self::parse_json_response(response, &self.endpoint).await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No choices returned from {}", self.endpoint))
    }

    async fn anthropic_chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let (system, turns) = split_system(messages);
        let mut request = json!({
            "model": self.model_id.model,
            "messages": turns,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        });
        if !system.is_empty() {
            request["system"] = json!(system);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Request to {} failed: {}", self.endpoint, e))?;

        let result: AnthropicResponse = Self::parse_json_response(response, &self.endpoint).await?;
        let text: String = result.content.into_iter().map(|c| c.text).collect();
        if text.is_empty() {
            return Err(anyhow!("No content returned from Anthropic API"));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatModel for ExternalChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        tracing::debug!(
            model = %self.model_id,
            messages = messages.len(),
            "Sending chat completion request"
        );
        let content = match self.model_id.provider {
            ApiProvider::Anthropic => self.anthropic_chat(messages).await?,
            _ => self.openai_compatible_chat(messages).await?,
        };
        Ok(ChatCompletion { content })
    }

    fn model_id(&self) -> &ModelId {
        &self.model_id
    }
}

fn default_endpoint(provider: &ApiProvider) -> String {
    match provider {
        ApiProvider::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
        ApiProvider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
        ApiProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions".to_string(),
        ApiProvider::Together => "https://api.together.xyz/v1/chat/completions".to_string(),
        ApiProvider::Groq => "https://api.groq.com/openai/v1/chat/completions".to_string(),
        ApiProvider::Ollama => "http://localhost:11434/v1/chat/completions".to_string(),
        ApiProvider::Custom { .. } => "http://localhost:8080/v1/chat/completions".to_string(),
    }
}

fn api_key_var(provider: &ApiProvider) -> Option<&'static str> {
    match provider {
        ApiProvider::OpenAI => Some("OPENAI_API_KEY"),
        ApiProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
        ApiProvider::OpenRouter => Some("OPENROUTER_API_KEY"),
        ApiProvider::Together => Some("TOGETHER_API_KEY"),
        ApiProvider::Groq => Some("GROQ_API_KEY"),
        ApiProvider::Ollama | ApiProvider::Custom { .. } => None,
    }
}

/// Anthropic takes the system prompt as a top-level field.
fn split_system(messages: &[ChatMessage]) -> (String, Vec<&ChatMessage>) {
    let system = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let turns = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .collect();
    (system, turns)
}
