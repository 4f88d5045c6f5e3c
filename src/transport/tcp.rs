//! TCP simulation of the short-range link, for bench development
//!
//! Every accepted TCP client is a peer. Each read is delivered as an RX
//! write, and notifications are written back to the socket unframed.

use crate::transport::traits::{LinkEvent, LinkTransport, PeerId, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use homeasst_shared::AdvertisingPayload;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TcpPeer {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

type PeerMap = Arc<Mutex<HashMap<PeerId, TcpPeer>>>;

/// Link backend that accepts peers over TCP
pub struct TcpLink {
    local_addr: SocketAddr,
    peers: PeerMap,
    event_tx: mpsc::Sender<LinkEvent>,
    event_rx: mpsc::Receiver<LinkEvent>,
    accept_task: JoinHandle<()>,
}

impl TcpLink {
    /// Bind the listener and start accepting peers
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::Setup(format!("bind {}: {}", address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(100);
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));

        let accept_task = tokio::spawn(accept_loop(listener, peers.clone(), event_tx.clone()));
        info!("[LINK] TCP simulation listening on {}", local_addr);

        Ok(Self {
            local_addr,
            peers,
            event_tx,
            event_rx,
            accept_task,
        })
    }

    /// Address peers connect to
    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Ok(peers) = self.peers.try_lock() {
            for peer in peers.values() {
                peer.reader.abort();
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, peers: PeerMap, event_tx: mpsc::Sender<LinkEvent>) {
    let mut next_id = 1u64;

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("[LINK] Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        let peer = PeerId(next_id);
        next_id += 1;
        debug!("[LINK] {} connected from {}", peer, addr);

        // The entry exists before Connected is seen; the reader holds its
        // first read until Connected is queued
        let (reader, writer) = stream.into_split();
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            peer,
            reader,
            ready_rx,
            peers.clone(),
            event_tx.clone(),
        ));
        peers.lock().await.insert(
            peer,
            TcpPeer {
                writer: Arc::new(Mutex::new(writer)),
                reader,
            },
        );

        if event_tx
            .send(LinkEvent::Connected {
                peer,
                label: addr.to_string(),
            })
            .await
            .is_err()
        {
            break;
        }
        let _ = ready_tx.send(());
    }
}

async fn read_loop(
    peer: PeerId,
    mut reader: OwnedReadHalf,
    ready: oneshot::Receiver<()>,
    peers: PeerMap,
    event_tx: mpsc::Sender<LinkEvent>,
) {
    if ready.await.is_err() {
        return;
    }
    let mut buf = vec![0u8; 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = LinkEvent::Write {
                    peer,
                    data: Bytes::copy_from_slice(&buf[..n]),
                };
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("[LINK] Read error from {}: {}", peer, e);
                break;
            }
        }
    }

    // Whoever removes the entry reports the disconnect
    if peers.lock().await.remove(&peer).is_some() {
        let _ = event_tx.send(LinkEvent::Disconnected { peer }).await;
    }
}

#[async_trait]
impl LinkTransport for TcpLink {
    async fn advertise(&self, payload: &AdvertisingPayload) -> Result<(), TransportError> {
        debug!(
            "[LINK] Advertising '{}' on {} ({:02X?})",
            payload.name(),
            self.local_addr,
            payload.as_bytes()
        );
        Ok(())
    }

    async fn notify(&self, peer: PeerId, chunk: &[u8]) -> Result<(), TransportError> {
        let writer = self
            .peers
            .lock()
            .await
            .get(&peer)
            .map(|p| p.writer.clone())
            .ok_or(TransportError::UnknownPeer(peer))?;

        let mut writer = writer.lock().await;
        writer
            .write_all(chunk)
            .await
            .map_err(|e| TransportError::Notify {
                peer,
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self, peer: PeerId) -> Result<(), TransportError> {
        let removed = self
            .peers
            .lock()
            .await
            .remove(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;

        removed.reader.abort();
        let _ = removed.writer.lock().await.shutdown().await;

        // The caller may be the only consumer of a full event queue
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let _ = event_tx.send(LinkEvent::Disconnected { peer }).await;
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        self.event_rx.recv().await
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}
