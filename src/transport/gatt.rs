//! BLE GATT peripheral using BlueZ
//!
//! Serves one primary service with an RX characteristic (write, acquired
//! socket) and a TX characteristic (notify, acquired socket). A device is a
//! peer from its first write or notify subscription until BlueZ reports it
//! disconnected.

use crate::transport::traits::{LinkEvent, LinkTransport, PeerId, TransportError};
use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic,
    CharacteristicControl, CharacteristicControlEvent, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod, Service,
};
use bluer::gatt::{CharacteristicReader, CharacteristicWriter};
use bluer::{Adapter, Address, DeviceEvent, DeviceProperty, Session, Uuid};
use bytes::Bytes;
use futures::StreamExt;
use homeasst_shared::{link, AdvertisingPayload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bluetooth base UUID carrying a 16-bit alias
pub fn uuid16(alias: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5F9B_34FB | ((alias as u128) << 96))
}

/// Advertisement registered with BlueZ for `payload`
///
/// bluetoothd assembles the AD structures itself: flags from `discoverable`,
/// the complete name from `local_name`, the 16-bit UUID list from
/// `service_uuids`. The payload bytes are the reference for that layout.
fn advertisement_for(payload: &AdvertisingPayload) -> Advertisement {
    Advertisement {
        advertisement_type: AdvertisementType::Peripheral,
        service_uuids: vec![uuid16(payload.service_alias())].into_iter().collect(),
        local_name: Some(payload.name().to_string()),
        discoverable: Some(true),
        ..Default::default()
    }
}

fn setup_error(e: bluer::Error) -> TransportError {
    TransportError::Setup(e.to_string())
}

struct GattPeer {
    address: Address,
    writer: Option<Arc<Mutex<CharacteristicWriter>>>,
    watcher: JoinHandle<()>,
}

/// State shared between the link handle and its background tasks
#[derive(Clone)]
struct GattShared {
    adapter: Adapter,
    peers: Arc<Mutex<HashMap<PeerId, GattPeer>>>,
    chunk_limits: Arc<RwLock<HashMap<PeerId, usize>>>,
    event_tx: mpsc::Sender<LinkEvent>,
    next_id: Arc<AtomicU64>,
}

impl GattShared {
    /// Look up the peer for `address`, registering it on first contact
    async fn peer_for(&self, address: Address) -> PeerId {
        let mut peers = self.peers.lock().await;
        if let Some((&peer, _)) = peers.iter().find(|(_, p)| p.address == address) {
            return peer;
        }

        let peer = PeerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let watcher = tokio::spawn(watch_device(self.clone(), peer, address));
        peers.insert(
            peer,
            GattPeer {
                address,
                writer: None,
                watcher,
            },
        );
        drop(peers);

        info!("[LINK] {} is {}", peer, address);
        let _ = self
            .event_tx
            .send(LinkEvent::Connected {
                peer,
                label: address.to_string(),
            })
            .await;
        peer
    }

    async fn accept_notify(&self, writer: CharacteristicWriter) {
        let address = writer.device_address();
        let limit = writer.mtu().saturating_sub(3).max(1);
        let peer = self.peer_for(address).await;

        if let Some(entry) = self.peers.lock().await.get_mut(&peer) {
            entry.writer = Some(Arc::new(Mutex::new(writer)));
        }
        if let Ok(mut limits) = self.chunk_limits.write() {
            limits.insert(peer, limit);
        }
        debug!("[LINK] {} subscribed to TX (chunk limit {})", peer, limit);
    }

    async fn forget(&self, peer: PeerId) {
        if self.peers.lock().await.remove(&peer).is_none() {
            return;
        }
        if let Ok(mut limits) = self.chunk_limits.write() {
            limits.remove(&peer);
        }
        let _ = self.event_tx.send(LinkEvent::Disconnected { peer }).await;
    }
}

/// Forward RX writes from one acquired socket
async fn read_writes(shared: GattShared, peer: PeerId, mut reader: CharacteristicReader, mtu: usize) {
    let mut buf = vec![0u8; mtu.max(23)];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = LinkEvent::Write {
                    peer,
                    data: Bytes::copy_from_slice(&buf[..n]),
                };
                if shared.event_tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("[LINK] RX socket of {} closed: {}", peer, e);
                break;
            }
        }
    }
}

/// Wait for BlueZ to report the device gone
async fn watch_device(shared: GattShared, peer: PeerId, address: Address) {
    match shared.adapter.device(address) {
        Ok(device) => match device.events().await {
            Ok(events) => {
                tokio::pin!(events);
                while let Some(event) = events.next().await {
                    if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                        break;
                    }
                }
            }
            Err(e) => warn!("[LINK] Cannot watch {}: {}", address, e),
        },
        Err(e) => warn!("[LINK] Unknown device {}: {}", address, e),
    }

    debug!("[LINK] {} ({}) disconnected", peer, address);
    shared.forget(peer).await;
}

async fn control_loop(shared: GattShared, rx_control: CharacteristicControl, tx_control: CharacteristicControl) {
    tokio::pin!(rx_control);
    tokio::pin!(tx_control);

    loop {
        tokio::select! {
            event = rx_control.next() => match event {
                Some(CharacteristicControlEvent::Write(request)) => {
                    let address = request.device_address();
                    let mtu = request.mtu();
                    match request.accept() {
                        Ok(reader) => {
                            let peer = shared.peer_for(address).await;
                            tokio::spawn(read_writes(shared.clone(), peer, reader, mtu));
                        }
                        Err(e) => warn!("[LINK] Cannot accept write from {}: {}", address, e),
                    }
                }
                Some(_) => {}
                None => break,
            },
            event = tx_control.next() => match event {
                Some(CharacteristicControlEvent::Notify(writer)) => shared.accept_notify(writer).await,
                Some(_) => {}
                None => break,
            },
        }
    }

    warn!("[LINK] GATT application closed");
}

/// GATT peripheral link
pub struct GattLink {
    _session: Session,
    _application: ApplicationHandle,
    shared: GattShared,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    event_rx: mpsc::Receiver<LinkEvent>,
    control_task: JoinHandle<()>,
}

impl GattLink {
    /// Power the default adapter and register the service
    pub async fn start(device_name: &str) -> Result<Self, TransportError> {
        let session = Session::new().await.map_err(setup_error)?;
        let adapter = session.default_adapter().await.map_err(setup_error)?;
        adapter.set_powered(true).await.map_err(setup_error)?;
        adapter
            .set_alias(device_name.to_string())
            .await
            .map_err(setup_error)?;

        let (rx_control, rx_handle) = characteristic_control();
        let (tx_control, tx_handle) = characteristic_control();

        let application = Application {
            services: vec![Service {
                uuid: Uuid::from_u128(link::SERVICE_UUID),
                primary: true,
                characteristics: vec![
                    Characteristic {
                        uuid: Uuid::from_u128(link::RX_CHARACTERISTIC_UUID),
                        write: Some(CharacteristicWrite {
                            write: true,
                            write_without_response: true,
                            method: CharacteristicWriteMethod::Io,
                            ..Default::default()
                        }),
                        control_handle: rx_handle,
                        ..Default::default()
                    },
                    Characteristic {
                        uuid: Uuid::from_u128(link::TX_CHARACTERISTIC_UUID),
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Io,
                            ..Default::default()
                        }),
                        control_handle: tx_handle,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };

        let application = adapter
            .serve_gatt_application(application)
            .await
            .map_err(setup_error)?;
        info!(
            "[LINK] GATT service {} registered on {}",
            Uuid::from_u128(link::SERVICE_UUID),
            adapter.name()
        );

        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(100);
        let shared = GattShared {
            adapter,
            peers: Arc::new(Mutex::new(HashMap::new())),
            chunk_limits: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let control_task = tokio::spawn(control_loop(shared.clone(), rx_control, tx_control));

        Ok(Self {
            _session: session,
            _application: application,
            shared,
            advertisement: Mutex::new(None),
            event_rx,
            control_task,
        })
    }
}

impl Drop for GattLink {
    fn drop(&mut self) {
        self.control_task.abort();
        if let Ok(peers) = self.shared.peers.try_lock() {
            for peer in peers.values() {
                peer.watcher.abort();
            }
        }
    }
}

#[async_trait]
impl LinkTransport for GattLink {
    async fn advertise(&self, payload: &AdvertisingPayload) -> Result<(), TransportError> {
        let advertisement = advertisement_for(payload);

        let mut current = self.advertisement.lock().await;
        // BlueZ rejects a second registration of the same instance
        current.take();
        let handle = self
            .shared
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|e| TransportError::Advertise(e.to_string()))?;
        *current = Some(handle);

        debug!("[LINK] Advertising {:02X?}", payload.as_bytes());
        Ok(())
    }

    async fn notify(&self, peer: PeerId, chunk: &[u8]) -> Result<(), TransportError> {
        let writer = {
            let peers = self.shared.peers.lock().await;
            let entry = peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
            entry.writer.clone().ok_or_else(|| TransportError::Notify {
                peer,
                reason: "not subscribed to TX".into(),
            })?
        };

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
        let address = self
            .shared
            .peers
            .lock()
            .await
            .get(&peer)
            .map(|p| p.address)
            .ok_or(TransportError::UnknownPeer(peer))?;

        let result = match self.shared.adapter.device(address) {
            Ok(device) => device.disconnect().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| TransportError::Disconnect {
            peer,
            reason: e.to_string(),
        })
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        self.event_rx.recv().await
    }

    fn max_chunk(&self, peer: PeerId) -> Option<usize> {
        self.shared
            .chunk_limits
            .read()
            .ok()
            .and_then(|limits| limits.get(&peer).copied())
    }

    fn name(&self) -> &'static str {
        "BLE GATT"
    }
}
