//! Session management for peers of the short-range link
//!
//! This module handles:
//! - Tracking connected peers and their lifecycle
//! - Advertising, and re-advertising after every disconnect
//! - Reassembling inbound writes into command lines
//! - Chunked, paced reply delivery to every active peer

mod connection;
mod manager;

pub use manager::{InboundFraming, SessionConfig, SessionManager};
