pub mod gatt;
pub mod tcp;
pub mod traits;

pub use gatt::GattLink;
pub use tcp::TcpLink;
pub use traits::{LinkEvent, LinkTransport, PeerId, TransportError};

/// Short-range link backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// BLE GATT peripheral (requires BlueZ)
    #[default]
    Gatt,
    /// TCP simulation (for development)
    TcpSimulation,
}

/// Link configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub mode: LinkMode,
    /// Advertised device name
    pub device_name: String,
    /// Listen address when mode is TcpSimulation
    pub tcp_address: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Gatt,
            device_name: homeasst_shared::link::DEVICE_NAME.into(),
            tcp_address: "127.0.0.1:9000".into(),
        }
    }
}

/// Bring up the configured link backend
pub async fn open_link(config: &LinkConfig) -> Result<Box<dyn LinkTransport>, TransportError> {
    match config.mode {
        LinkMode::Gatt => Ok(Box::new(GattLink::start(&config.device_name).await?)),
        LinkMode::TcpSimulation => Ok(Box::new(TcpLink::bind(&config.tcp_address).await?)),
    }
}
