//! Legacy advertising payload
//!
//! Layout (AD structures, each `[len][type][data]`):
//! ```text
//! [ 02 01 <flags> ][ <name len + 1> 09 <name bytes> ][ 03 03 <uuid16 LE> ]
//! ```
//!
//! Existing peer apps match on these bytes, so the layout is fixed.

use thiserror::Error;

/// Maximum size of a legacy advertising PDU payload
pub const MAX_PAYLOAD_LEN: usize = 31;

/// LE General Discoverable, BR/EDR not supported
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;

/// Errors that can occur while building an advertisement
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdvertisingError {
    #[error("Device name '{name}' needs {needed} bytes, payload max is {MAX_PAYLOAD_LEN}")]
    NameTooLong { name: String, needed: usize },

    #[error("Device name is empty")]
    EmptyName,
}

/// Fixed advertisement built once per session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingPayload {
    name: String,
    service_alias: u16,
    bytes: Vec<u8>,
}

impl AdvertisingPayload {
    /// Build the payload for `name` advertising the 16-bit `service_alias`
    pub fn new(name: &str, service_alias: u16) -> Result<Self, AdvertisingError> {
        if name.is_empty() {
            return Err(AdvertisingError::EmptyName);
        }

        let needed = 3 + 2 + name.len() + 4;
        if needed > MAX_PAYLOAD_LEN {
            return Err(AdvertisingError::NameTooLong {
                name: name.into(),
                needed,
            });
        }

        let mut bytes = Vec::with_capacity(needed);
        bytes.extend_from_slice(&[0x02, AD_TYPE_FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
        bytes.push(name.len() as u8 + 1);
        bytes.push(AD_TYPE_COMPLETE_NAME);
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&[0x03, AD_TYPE_UUID16_COMPLETE]);
        bytes.extend_from_slice(&service_alias.to_le_bytes());

        Ok(Self {
            name: name.into(),
            service_alias,
            bytes,
        })
    }

    /// Raw advertisement bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Advertised device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertised 16-bit service alias
    pub fn service_alias(&self) -> u16 {
        self.service_alias
    }
}
