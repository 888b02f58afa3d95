//! Station addresses for the packet-radio link
//!
//! A station is identified by a call identifier of up to six uppercase
//! alphanumeric characters and a sub-station identifier (SSID) in `0..=15`.
//! The text form is `CALL` or `CALL-SSID`; the SSID is omitted when zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};
use crate::{ADDRESS_LEN, CALL_LEN, MAX_SSID};

/// Reserved bits of the SSID byte (both set, as transmitted by common TNCs)
const SSID_RESERVED_BITS: u8 = 0b0110_0000;

/// Address-extension bit: set on the last address in the chain
pub const ADDRESS_LAST_BIT: u8 = 0x01;

/// Validated station address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StationAddress {
    call: String,
    ssid: u8,
}

impl StationAddress {
    /// Create an address from a call identifier and SSID
    ///
    /// Surrounding whitespace is trimmed and the call identifier is
    /// uppercased. Empty identifiers, identifiers longer than six characters,
    /// non-alphanumeric characters and SSIDs above 15 are rejected.
    pub fn new(call: &str, ssid: u8) -> Result<Self> {
        Self::validated(call.trim().to_ascii_uppercase(), ssid)
    }

    /// Check an already-normalized call identifier and SSID
    fn validated(call: String, ssid: u8) -> Result<Self> {
        if call.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "call identifier is empty".to_string(),
            ));
        }
        if call.len() > CALL_LEN {
            return Err(ProtocolError::InvalidAddress(format!(
                "call identifier '{}' longer than {} characters",
                call, CALL_LEN
            )));
        }
        if !call
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(ProtocolError::InvalidAddress(format!(
                "call identifier '{}' is not uppercase alphanumeric",
                call
            )));
        }
        if ssid > MAX_SSID {
            return Err(ProtocolError::InvalidAddress(format!(
                "ssid {} out of range 0-{}",
                ssid, MAX_SSID
            )));
        }

        Ok(Self { call, ssid })
    }

    /// Call identifier (uppercase, unpadded)
    pub fn call(&self) -> &str {
        &self.call
    }

    /// Sub-station identifier
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Whether both addresses share the same call identifier, ignoring SSID
    pub fn same_call(&self, other: &StationAddress) -> bool {
        self.call == other.call
    }

    /// Encode into the 7-byte on-air form
    ///
    /// Six space-padded call bytes shifted left by one, then the SSID byte
    /// carrying the reserved bits, the SSID in bits 4..1 and the
    /// last-address bit.
    pub fn encode(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [b' ' << 1; ADDRESS_LEN];
        for (slot, byte) in out.iter_mut().zip(self.call.bytes()) {
            *slot = byte << 1;
        }
        out[CALL_LEN] = SSID_RESERVED_BITS | ((self.ssid & 0x0F) << 1) | ADDRESS_LAST_BIT;
        out
    }

    /// Decode a 7-byte on-air address
    ///
    /// Fails with `MalformedFrame` when the last-address bit is clear (chain
    /// extension is not supported) or when the decoded call is not a valid
    /// identifier. Only trailing space padding is stripped, so a field that
    /// decodes successfully re-encodes to the same call bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ADDRESS_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "address field needs {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )));
        }

        let ssid_byte = bytes[CALL_LEN];
        if ssid_byte & ADDRESS_LAST_BIT == 0 {
            return Err(ProtocolError::MalformedFrame(
                "address chain extension not supported".to_string(),
            ));
        }

        let call: String = bytes[..CALL_LEN]
            .iter()
            .map(|b| char::from(b >> 1))
            .collect();
        let ssid = (ssid_byte >> 1) & 0x0F;

        Self::validated(call.trim_end_matches(' ').to_string(), ssid)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }
}

impl fmt::Display for StationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.call)
        } else {
            write!(f, "{}-{}", self.call, self.ssid)
        }
    }
}

impl FromStr for StationAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            Some((call, ssid)) => {
                let ssid: u8 = ssid.trim().parse().map_err(|_| {
                    ProtocolError::InvalidAddress(format!("invalid ssid in '{}'", s))
                })?;
                Self::new(call, ssid)
            }
            None => Self::new(s, 0),
        }
    }
}

impl TryFrom<String> for StationAddress {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<StationAddress> for String {
    fn from(address: StationAddress) -> Self {
        address.to_string()
    }
}
