//! Command handling for inbound peer lines
//!
//! This module handles:
//! - Recognizing the exit token and local LED commands
//! - Forwarding queries to the collaborator with a bounded wait
//! - Applying control directives found in collaborator answers
//! - Producing the reply text for the peer

mod dispatcher;

pub use dispatcher::{CommandDispatcher, DispatchConfig, DispatchOutcome, ReplySink};
