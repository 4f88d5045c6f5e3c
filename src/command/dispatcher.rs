//! Command dispatcher - routes one inbound line per call
//!
//! A line is either the exit token, a local LED command, or a query for the
//! collaborator. Replies go to a `ReplySink`; the dispatcher keeps no state
//! between lines.

use crate::actuator::ActuatorScheduler;
use crate::collaborator::Collaborator;
use async_trait::async_trait;
use homeasst_shared::directive::{self, ControlDirective};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Receives replies produced while dispatching
#[async_trait]
pub trait ReplySink: Send {
    /// Deliver one reply message
    async fn reply(&mut self, text: &str);
}

/// What the session should do after a line was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keep the exchange going
    Continue,
    /// The peer asked to end the exchange
    Teardown,
}

/// Fixed texts and limits used by the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Case-insensitive token that ends an exchange
    pub exit_token: String,
    pub welcome: String,
    pub farewell: String,
    pub processing: String,
    pub apology: String,
    /// Upper bound for one collaborator call
    pub query_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            exit_token: "exit".into(),
            welcome: "Connected to the home assistant. Ask me anything, or send 'exit' to finish."
                .into(),
            farewell: "Goodbye!".into(),
            processing: "Processing...".into(),
            apology: "Sorry, I couldn't reach the assistant right now. Please try again.".into(),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatches inbound command lines
pub struct CommandDispatcher {
    collaborator: Arc<dyn Collaborator>,
    actuator: ActuatorScheduler,
    config: DispatchConfig,
}

fn not_applied(error: impl Display, remainder: &str) -> String {
    if remainder.is_empty() {
        format!("LED command not applied ({})", error)
    } else {
        format!("LED command not applied ({}). {}", error, remainder)
    }
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        actuator: ActuatorScheduler,
        config: DispatchConfig,
    ) -> Self {
        Self {
            collaborator,
            actuator,
            config,
        }
    }

    /// Greeting sent to a newly connected peer
    pub fn welcome(&self) -> &str {
        &self.config.welcome
    }

    /// Handle one complete inbound line
    pub async fn dispatch(&self, line: &str, sink: &mut dyn ReplySink) -> DispatchOutcome {
        let trimmed = line.trim();

        if trimmed.eq_ignore_ascii_case(&self.config.exit_token) {
            info!("[CMD] Exit requested");
            sink.reply(&self.config.farewell).await;
            return DispatchOutcome::Teardown;
        }

        if trimmed.is_empty() {
            debug!("[CMD] Ignoring empty line");
            return DispatchOutcome::Continue;
        }

        if let Some(local) = directive::parse_command(trimmed) {
            info!("[CMD] Local command: {}", trimmed);
            let reply = match local {
                Ok(directive) => self.actuate(directive, "").await,
                Err(e) => not_applied(e, ""),
            };
            sink.reply(&reply).await;
            return DispatchOutcome::Continue;
        }

        sink.reply(&self.config.processing).await;
        let reply = self.query(line).await;
        if !reply.is_empty() {
            sink.reply(&reply).await;
        }
        DispatchOutcome::Continue
    }

    /// Forward a prompt to the collaborator and turn its answer into a reply
    async fn query(&self, prompt: &str) -> String {
        info!("[AI] Query via {}: {} bytes", self.collaborator.name(), prompt.len());

        match timeout(self.config.query_timeout, self.collaborator.complete(prompt)).await {
            Ok(Ok(response)) => self.interpret(&response).await,
            Ok(Err(e)) => {
                warn!("[AI] Query failed: {}", e);
                self.config.apology.clone()
            }
            Err(_) => {
                warn!(
                    "[AI] Query timed out after {:?}",
                    self.config.query_timeout
                );
                self.config.apology.clone()
            }
        }
    }

    /// Apply a directive found in `response`, or return its plain text
    pub async fn interpret(&self, response: &str) -> String {
        let parsed = directive::parse(response);
        match parsed.directive {
            Ok(Some(found)) => self.actuate(found, &parsed.remainder).await,
            Ok(None) => parsed.remainder,
            Err(e) => {
                warn!("[CMD] Directive rejected: {}", e);
                not_applied(e, &parsed.remainder)
            }
        }
    }

    async fn actuate(&self, directive: ControlDirective, remainder: &str) -> String {
        match self.actuator.apply(directive).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                warn!("[CMD] {:?} rejected: {}", directive.kind(), e);
                not_applied(e, remainder)
            }
        }
    }
}
