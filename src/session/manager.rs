//! Session manager for the short-range link
//!
//! Owns the peer table and the advertising state, turns link events into
//! dispatcher calls and fans replies out to every active peer.

use super::connection::{PeerState, PeerTable};
use crate::command::{CommandDispatcher, DispatchOutcome, ReplySink};
use crate::transport::{LinkEvent, LinkTransport, PeerId, TransportError};
use async_trait::async_trait;
use futures::future::join_all;
use homeasst_shared::{codec, link, AdvertisingPayload};
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How inbound writes become command lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboundFraming {
    /// Every write completes a line
    #[default]
    PerWrite,
    /// Bytes accumulate until a newline
    Newline,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub framing: InboundFraming,
    /// Upper bound for one notification chunk
    pub max_chunk: usize,
    /// Pause between chunks of one message to one peer
    pub chunk_interval: Duration,
    /// Longest accepted inbound line
    pub max_line: usize,
    /// Peer table maintenance period
    pub housekeeping_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            framing: InboundFraming::PerWrite,
            max_chunk: link::MAX_NOTIFY_CHUNK,
            chunk_interval: Duration::from_millis(link::CHUNK_INTERVAL_MS),
            max_line: link::MAX_LINE_BYTES,
            housekeeping_interval: Duration::from_secs(1),
        }
    }
}

/// Send one message to one peer, chunk by chunk
///
/// The first failed chunk aborts the rest of the message for this peer.
async fn send_chunks(
    link: &dyn LinkTransport,
    config: &SessionConfig,
    peer: PeerId,
    payload: &[u8],
) -> Result<(), TransportError> {
    let size = link
        .max_chunk(peer)
        .map_or(config.max_chunk, |limit| limit.min(config.max_chunk));

    debug!(
        "[SESSION] {} byte(s) to {} in {} chunk(s)",
        payload.len(),
        peer,
        codec::chunk_count(payload, size)
    );
    for (index, chunk) in codec::split(payload, size).enumerate() {
        if index > 0 {
            sleep(config.chunk_interval).await;
        }
        link.notify(peer, chunk).await?;
    }
    Ok(())
}

/// Reply sink that broadcasts to every active peer
struct Broadcast<'a> {
    link: &'a dyn LinkTransport,
    peers: &'a mut PeerTable,
    config: &'a SessionConfig,
}

#[async_trait]
impl ReplySink for Broadcast<'_> {
    async fn reply(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let targets = self.peers.active();
        if targets.is_empty() {
            debug!("[SESSION] No active peers for reply");
            return;
        }

        let link = self.link;
        let config = self.config;
        let results = join_all(
            targets
                .iter()
                .map(|&peer| send_chunks(link, config, peer, text.as_bytes())),
        )
        .await;

        for (peer, result) in targets.into_iter().zip(results) {
            if let Err(e) = result {
                warn!("[SESSION] Delivery to {} aborted: {}", peer, e);
                if matches!(e, TransportError::UnknownPeer(_)) {
                    self.peers.mark_disconnected(peer);
                }
            }
        }
    }
}

/// Manages peers of one link
pub struct SessionManager {
    link: Box<dyn LinkTransport>,
    dispatcher: CommandDispatcher,
    peers: PeerTable,
    payload: AdvertisingPayload,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a session manager; the advertising payload is fixed from here on
    pub fn new(
        link: Box<dyn LinkTransport>,
        dispatcher: CommandDispatcher,
        payload: AdvertisingPayload,
        config: SessionConfig,
    ) -> Self {
        Self {
            link,
            dispatcher,
            peers: PeerTable::new(),
            payload,
            config,
        }
    }

    /// Active peer ids
    #[cfg(test)]
    pub fn active_peers(&self) -> Vec<PeerId> {
        self.peers.active()
    }

    /// Advertise, then process link events until the link shuts down
    pub async fn run(&mut self) -> Result<(), TransportError> {
        info!(
            "[SESSION] Starting on {} as '{}'",
            self.link.name(),
            self.payload.name()
        );
        self.advertise().await;

        let mut ticker = interval(self.config.housekeeping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.link.next_event() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => return Err(TransportError::Closed),
                },
                _ = ticker.tick() => self.housekeeping(),
            }
        }
    }

    /// Process one link event
    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { peer, label } => self.on_connect(peer, label).await,
            LinkEvent::Disconnected { peer } => self.on_disconnect(peer).await,
            LinkEvent::Write { peer, data } => self.on_write(peer, &data).await,
        }
    }

    async fn advertise(&self) {
        if let Err(e) = self.link.advertise(&self.payload).await {
            warn!("[SESSION] Advertising failed (non-fatal): {}", e);
        }
    }

    async fn on_connect(&mut self, peer: PeerId, label: String) {
        if !self.peers.connect(peer, label.clone(), self.config.max_line) {
            warn!("[SESSION] Duplicate connect for {} ignored", peer);
            return;
        }
        self.peers.activate(peer);
        info!(
            "[SESSION] {} connected ({}), {} peer(s)",
            peer,
            label,
            self.peers.len()
        );

        let welcome = self.dispatcher.welcome().as_bytes();
        if let Err(e) = send_chunks(self.link.as_ref(), &self.config, peer, welcome).await {
            warn!("[SESSION] Welcome to {} failed: {}", peer, e);
        }
    }

    async fn on_disconnect(&mut self, peer: PeerId) {
        match self.peers.remove(peer) {
            Some(conn) => info!(
                "[SESSION] {} ({}) disconnected after {:?}",
                peer,
                conn.label,
                conn.connected_at.elapsed()
            ),
            None => debug!("[SESSION] Disconnect for unknown {}", peer),
        }
        self.advertise().await;
    }

    async fn on_write(&mut self, peer: PeerId, data: &[u8]) {
        let framing = self.config.framing;
        let Some(conn) = self.peers.get_mut(peer) else {
            warn!("[SESSION] Write from unknown {} dropped", peer);
            return;
        };
        if conn.state != PeerState::Active {
            debug!("[SESSION] Write from inactive {} dropped", peer);
            return;
        }

        conn.assembler.extend(data);
        let mut lines = Vec::new();
        loop {
            match conn.assembler.next_line() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(e) => warn!("[SESSION] {} from {}", e, peer),
            }
        }
        if framing == InboundFraming::PerWrite {
            match conn.assembler.flush() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(e) => warn!("[SESSION] {} from {}", e, peer),
            }
        }

        for line in lines {
            debug!("[SESSION] {} -> {:?}", peer, line);
            let mut sink = Broadcast {
                link: self.link.as_ref(),
                peers: &mut self.peers,
                config: &self.config,
            };
            let outcome = self.dispatcher.dispatch(&line, &mut sink).await;

            if outcome == DispatchOutcome::Teardown {
                info!("[SESSION] Ending exchange with {}", peer);
                if let Err(e) = self.link.disconnect(peer).await {
                    warn!("[SESSION] Disconnect of {} failed: {}", peer, e);
                }
                break;
            }
        }
    }

    fn housekeeping(&mut self) {
        let purged = self.peers.purge_disconnected();
        if purged > 0 {
            info!("[SESSION] Purged {} stale peer(s)", purged);
        }
        if !self.peers.is_empty() {
            debug!("[SESSION] {} active peer(s)", self.peers.active().len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorScheduler, MemoryPin};
    use crate::collaborator::{Collaborator, CollaboratorError};
    use crate::command::DispatchConfig;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct LinkLog {
        notified: Vec<(PeerId, Vec<u8>, Instant)>,
        advertised: usize,
        disconnects: Vec<PeerId>,
        /// Fail notifications to a peer after this many chunks
        fail_after: HashMap<PeerId, usize>,
        fail_advertise: bool,
    }

    impl LinkLog {
        fn received(&self, peer: PeerId) -> Vec<u8> {
            codec::join(
                self.notified
                    .iter()
                    .filter(|(p, _, _)| *p == peer)
                    .map(|(_, chunk, _)| chunk.clone()),
            )
        }

        fn chunks(&self, peer: PeerId) -> Vec<(Vec<u8>, Instant)> {
            self.notified
                .iter()
                .filter(|(p, _, _)| *p == peer)
                .map(|(_, chunk, at)| (chunk.clone(), *at))
                .collect()
        }
    }

    struct MockLink {
        log: Arc<Mutex<LinkLog>>,
        events: mpsc::Receiver<LinkEvent>,
    }

    #[async_trait]
    impl LinkTransport for MockLink {
        async fn advertise(&self, _payload: &AdvertisingPayload) -> Result<(), TransportError> {
            let mut log = self.log.lock().unwrap();
            log.advertised += 1;
            if log.fail_advertise {
                return Err(TransportError::Advertise("adapter busy".into()));
            }
            Ok(())
        }

        async fn notify(&self, peer: PeerId, chunk: &[u8]) -> Result<(), TransportError> {
            let mut log = self.log.lock().unwrap();
            let sent = log.notified.iter().filter(|(p, _, _)| *p == peer).count();
            if log.fail_after.get(&peer).is_some_and(|&limit| sent >= limit) {
                return Err(TransportError::Notify {
                    peer,
                    reason: "link lost".into(),
                });
            }
            log.notified.push((peer, chunk.to_vec(), Instant::now()));
            Ok(())
        }

        async fn disconnect(&self, peer: PeerId) -> Result<(), TransportError> {
            self.log.lock().unwrap().disconnects.push(peer);
            Ok(())
        }

        async fn next_event(&mut self) -> Option<LinkEvent> {
            self.events.recv().await
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct Echo {
        prompts: Mutex<Vec<String>>,
        answer: String,
    }

    #[async_trait]
    impl Collaborator for Echo {
        async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
            self.prompts.lock().unwrap().push(prompt.into());
            Ok(self.answer.clone())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct Harness {
        session: SessionManager,
        log: Arc<Mutex<LinkLog>>,
        collaborator: Arc<Echo>,
        events: mpsc::Sender<LinkEvent>,
    }

    fn harness(answer: &str, config: SessionConfig) -> Harness {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let (events, rx) = mpsc::channel(16);
        let link = MockLink {
            log: log.clone(),
            events: rx,
        };
        let collaborator = Arc::new(Echo {
            prompts: Mutex::new(Vec::new()),
            answer: answer.into(),
        });
        let dispatcher = CommandDispatcher::new(
            collaborator.clone(),
            ActuatorScheduler::new(Box::new(MemoryPin::new())),
            DispatchConfig::default(),
        );
        let payload = AdvertisingPayload::new("PicoAI", 1).expect("payload");
        Harness {
            session: SessionManager::new(Box::new(link), dispatcher, payload, config),
            log,
            collaborator,
            events,
        }
    }

    fn connected(peer: u64) -> LinkEvent {
        LinkEvent::Connected {
            peer: PeerId(peer),
            label: format!("peer-{}", peer),
        }
    }

    fn write(peer: u64, data: &str) -> LinkEvent {
        LinkEvent::Write {
            peer: PeerId(peer),
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).expect("utf8")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_welcomes_only_new_peer() {
        let mut h = harness("unused", SessionConfig::default());
        let welcome = DispatchConfig::default().welcome;

        h.session.handle_event(connected(1)).await;
        h.session.handle_event(connected(2)).await;
        h.session.handle_event(connected(2)).await;

        let log = h.log.lock().unwrap();
        assert_eq!(text(log.received(PeerId(1))), welcome);
        assert_eq!(text(log.received(PeerId(2))), welcome);
        drop(log);
        assert_eq!(h.session.active_peers(), vec![PeerId(1), PeerId(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_sends_farewell_and_disconnects() {
        let mut h = harness("unused", SessionConfig::default());
        h.session.handle_event(connected(1)).await;
        h.log.lock().unwrap().notified.clear();

        h.session.handle_event(write(1, " EXIT ")).await;

        let log = h.log.lock().unwrap();
        assert_eq!(text(log.received(PeerId(1))), "Goodbye!");
        assert_eq!(log.disconnects, vec![PeerId(1)]);
        drop(log);
        assert!(h.collaborator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_readvertises() {
        let mut h = harness("unused", SessionConfig::default());
        h.session.handle_event(connected(1)).await;
        h.session.handle_event(connected(2)).await;

        h.session
            .handle_event(LinkEvent::Disconnected { peer: PeerId(1) })
            .await;

        assert_eq!(h.log.lock().unwrap().advertised, 1);
        assert_eq!(h.session.active_peers(), vec![PeerId(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_chunked_paced_and_broadcast() {
        let answer = "x".repeat(250);
        let mut h = harness(&answer, SessionConfig::default());
        h.session.handle_event(connected(1)).await;
        h.session.handle_event(connected(2)).await;
        h.log.lock().unwrap().notified.clear();

        h.session.handle_event(write(1, "tell me a long story")).await;

        let log = h.log.lock().unwrap();
        for peer in [PeerId(1), PeerId(2)] {
            let chunks = log.chunks(peer);
            // "Processing..." then the answer in 100/100/50 byte chunks
            let sizes: Vec<usize> = chunks.iter().map(|(c, _)| c.len()).collect();
            assert_eq!(sizes, vec![13, 100, 100, 50]);
            for pair in chunks[1..].windows(2) {
                assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(100));
            }
            assert_eq!(text(log.received(peer)), format!("Processing...{}", answer));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_peer_does_not_starve_others() {
        let answer = "y".repeat(300);
        let mut h = harness(&answer, SessionConfig::default());
        h.session.handle_event(connected(1)).await;
        h.session.handle_event(connected(2)).await;
        {
            let mut log = h.log.lock().unwrap();
            log.notified.clear();
            // peer 1 takes "Processing..." and one answer chunk, then breaks
            log.fail_after.insert(PeerId(1), 2);
        }

        h.session.handle_event(write(2, "story please")).await;

        let log = h.log.lock().unwrap();
        assert_eq!(log.chunks(PeerId(1)).len(), 2);
        assert_eq!(log.chunks(PeerId(2)).len(), 4);
        assert_eq!(
            text(log.received(PeerId(2))),
            format!("Processing...{}", answer)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_newline_framing_reassembles() {
        let config = SessionConfig {
            framing: InboundFraming::Newline,
            ..Default::default()
        };
        let mut h = harness("Hi there", config);
        h.session.handle_event(connected(1)).await;

        h.session.handle_event(write(1, "hel")).await;
        assert!(h.collaborator.prompts.lock().unwrap().is_empty());
        h.session.handle_event(write(1, "lo\nagain")).await;

        assert_eq!(
            *h.collaborator.prompts.lock().unwrap(),
            vec!["hello".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_write_framing() {
        let mut h = harness("Sure", SessionConfig::default());
        h.session.handle_event(connected(1)).await;

        h.session.handle_event(write(1, "first\nsecond")).await;

        assert_eq!(
            *h.collaborator.prompts.lock().unwrap(),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_from_unknown_peer_is_dropped() {
        let mut h = harness("unused", SessionConfig::default());
        h.session.handle_event(write(9, "hello")).await;
        assert!(h.collaborator.prompts.lock().unwrap().is_empty());
        assert!(h.log.lock().unwrap().notified.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_advertises_and_ends_with_link() {
        let mut h = harness("unused", SessionConfig::default());
        h.events.send(connected(1)).await.expect("send");
        drop(h.events);

        let result = h.session.run().await;

        assert!(matches!(result, Err(TransportError::Closed)));
        let log = h.log.lock().unwrap();
        assert_eq!(log.advertised, 1);
        assert!(!log.received(PeerId(1)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertise_failure_is_not_fatal() {
        let mut h = harness("pong", SessionConfig::default());
        h.log.lock().unwrap().fail_advertise = true;

        h.events.send(connected(1)).await.expect("send");
        h.events.send(write(1, "hello")).await.expect("send");
        h.events
            .send(LinkEvent::Disconnected { peer: PeerId(1) })
            .await
            .expect("send");
        drop(h.events);

        let result = h.session.run().await;

        assert!(matches!(result, Err(TransportError::Closed)));
        assert_eq!(*h.collaborator.prompts.lock().unwrap(), vec!["hello".to_string()]);
        let log = h.log.lock().unwrap();
        // startup plus the re-advertise after the disconnect
        assert_eq!(log.advertised, 2);
        assert!(text(log.received(PeerId(1))).contains("pong"));
    }
}
