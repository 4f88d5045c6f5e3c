//! AI collaborator access
//!
//! The dispatcher only needs `complete(prompt) -> text`; the HTTP client
//! behind it speaks the OpenAI-compatible chat-completions protocol.

mod client;

pub use client::{ChatClient, CollaboratorConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single completion request
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A text-completion service
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Complete `prompt`, returning the assistant text
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
