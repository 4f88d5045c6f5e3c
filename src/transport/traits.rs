//! Short-range link abstraction for pluggable backends

use async_trait::async_trait;
use bytes::Bytes;
use homeasst_shared::AdvertisingPayload;
use std::fmt;
use thiserror::Error;

/// Opaque peer handle, unique for the lifetime of a link backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Link-level events, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peer can now receive notifications
    Connected { peer: PeerId, label: String },
    /// A peer went away
    Disconnected { peer: PeerId },
    /// A peer wrote to the RX characteristic
    Write { peer: PeerId, data: Bytes },
}

/// Link and transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("advertising failed: {0}")]
    Advertise(String),

    #[error("notify to {peer} failed: {reason}")]
    Notify { peer: PeerId, reason: String },

    #[error("{0} is not connected")]
    UnknownPeer(PeerId),

    #[error("disconnect of {peer} failed: {reason}")]
    Disconnect { peer: PeerId, reason: String },

    #[error("link setup failed: {0}")]
    Setup(String),

    #[error("link event stream closed")]
    Closed,
}

/// A connectable short-range link (GATT peripheral or simulation)
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Start (or restart) advertising with `payload`
    async fn advertise(&self, payload: &AdvertisingPayload) -> Result<(), TransportError>;

    /// Deliver one chunk to `peer` on the TX characteristic
    async fn notify(&self, peer: PeerId, chunk: &[u8]) -> Result<(), TransportError>;

    /// Drop the link to `peer`; a `Disconnected` event follows
    async fn disconnect(&self, peer: PeerId) -> Result<(), TransportError>;

    /// Next link event; `None` once the backend has shut down
    async fn next_event(&mut self) -> Option<LinkEvent>;

    /// Largest chunk `peer` accepts, if the backend knows better than config
    fn max_chunk(&self, _peer: PeerId) -> Option<usize> {
        None
    }

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}
