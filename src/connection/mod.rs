//! Uplink management and supervision
//!
//! This module handles:
//! - Uplink bring-up with bounded retries
//! - Periodic uplink probing while a session runs
//! - The restart-forever supervisory loop with fixed backoff

mod supervisor;
mod uplink;

pub use supervisor::{Session, SessionFactory, Supervisor, SupervisorConfig};
pub use uplink::{TcpUplink, UplinkConfig, UplinkHandle};
