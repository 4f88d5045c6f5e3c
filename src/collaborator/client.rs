//! Chat-completion client for OpenAI-compatible endpoints

use super::{Collaborator, CollaboratorError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Instructions sent ahead of every query
pub const SYSTEM_PROMPT: &str = "You are a home assistant running on a small board with one LED. \
Answer briefly in plain text. When the user asks to control the light, add exactly one command \
to your answer: LED_CONTROL_ON duration=<seconds>, LED_CONTROL_OFF, or \
LED_CONTROL_BLINK delay=<seconds> times=<count> duration=<seconds>. \
All parameters are optional; leave out duration to keep the light on.";

/// Collaborator service configuration
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    /// Full chat-completions URL
    pub endpoint: String,
    /// Bearer token
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stop: Vec<String>,
    /// Network-level request timeout
    pub timeout: Duration,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            system_prompt: SYSTEM_PROMPT.into(),
            temperature: 0.7,
            max_tokens: 256,
            top_p: 1.0,
            stop: vec!["User:".into()],
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatResponse {
    fn into_content(self) -> Result<String, CollaboratorError> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CollaboratorError::Malformed("response has no choices".into()))
    }
}

/// HTTP collaborator
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    config: CollaboratorConfig,
}

impl ChatClient {
    /// Build a client with the configured request timeout
    pub fn new(config: CollaboratorConfig) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn request<'a>(&'a self, prompt: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: self.config.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: prompt.into(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            stream: false,
            stop: &self.config.stop,
        }
    }
}

#[async_trait]
impl Collaborator for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .json(&self.request(prompt));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(self.config.timeout)
            } else {
                CollaboratorError::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
        let content = body.into_content()?;
        debug!("[AI] Completion: {} bytes", content.len());
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
