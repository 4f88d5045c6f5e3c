//! Home Assistant Edge Shared Protocol Pieces
//!
//! This crate provides the I/O-free parts of the short-range link protocol:
//! outbound fragmentation and inbound reassembly, the control directive
//! grammar embedded in assistant responses, and the advertising payload.

pub mod advertising;
pub mod codec;
pub mod directive;

pub use advertising::{AdvertisingError, AdvertisingPayload};
pub use codec::{CodecError, LineAssembler};
pub use directive::{ControlDirective, DirectiveError, ParsedResponse};

/// Seconds, as carried by directive parameters
pub type Seconds = f64;

/// Link-level parameters shared by every peer-facing component
pub mod link {
    /// UART-style GATT service UUID
    pub const SERVICE_UUID: u128 = 0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E;

    /// RX characteristic (peer writes commands here)
    pub const RX_CHARACTERISTIC_UUID: u128 = 0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E;

    /// TX characteristic (replies are notified here)
    pub const TX_CHARACTERISTIC_UUID: u128 = 0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E;

    /// Default advertised device name
    pub const DEVICE_NAME: &str = "PicoAI";

    /// Maximum bytes per notification chunk
    pub const MAX_NOTIFY_CHUNK: usize = 100;

    /// Minimum pause between two chunks of one message to one peer
    pub const CHUNK_INTERVAL_MS: u64 = 100;

    /// Upper bound for a reassembled inbound command line
    pub const MAX_LINE_BYTES: usize = 512;

    /// 16-bit alias of a 128-bit service UUID, as carried in the advertisement
    pub const fn service_alias(uuid: u128) -> u16 {
        (uuid >> 96) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_alias() {
        assert_eq!(link::service_alias(link::SERVICE_UUID), 0x0001);
        assert_eq!(link::service_alias(0x0000180D_0000_1000_8000_00805F9B34FB), 0x180D);
    }

    #[test]
    fn test_characteristics_share_service_base() {
        let mask = !(0xFFFFu128 << 96);
        assert_eq!(link::SERVICE_UUID & mask, link::RX_CHARACTERISTIC_UUID & mask);
        assert_eq!(link::SERVICE_UUID & mask, link::TX_CHARACTERISTIC_UUID & mask);
    }
}
