//! Wire codecs for the MQTT ↔ packet-radio bridge
//!
//! Three layers sit between a bus message and the modem's TCP socket:
//!
//! 1. **Payload wrapper** - keeps the original topic next to the payload
//! 2. **AX.25 UI frame** - link-layer addressing between two stations
//! 3. **KISS framing** - delimits and escapes frames on the modem byte stream
//!
//! # Outbound
//!
//! ```rust
//! use radiobridge_protocol::{frame, kiss, wrapper, StationAddress};
//!
//! let local: StationAddress = "N0CALL-1".parse().unwrap();
//! let peer: StationAddress = "N0CALL-2".parse().unwrap();
//!
//! let body = wrapper::wrap("msh/bridge/test", b"Hello").unwrap();
//! let ax25 = frame::encode(&peer, &local, &body).unwrap();
//! let wire = kiss::frame(&ax25);
//! assert_eq!(wire[0], 0xC0);
//! ```
//!
//! # Inbound
//!
//! ```rust
//! # use radiobridge_protocol::{frame, kiss, wrapper, StationAddress};
//! # let local: StationAddress = "N0CALL-1".parse().unwrap();
//! # let wire = kiss::frame(&frame::encode(&local, &local, &wrapper::wrap("t", b"p").unwrap()).unwrap());
//! let mut decoder = kiss::KissDecoder::new();
//! for ax25 in decoder.feed(&wire) {
//!     let decoded = frame::decode(&ax25).unwrap();
//!     let (topic, payload) = wrapper::unwrap(&decoded.body).unwrap();
//!     assert_eq!(topic, "t");
//!     assert_eq!(&payload[..], b"p");
//! }
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod frame;
pub mod kiss;
pub mod wrapper;

pub use address::StationAddress;
pub use error::{ProtocolError, Result};
pub use frame::AddressedFrame;
pub use kiss::KissDecoder;
pub use wrapper::WrappedPayload;

// ===== AX.25 =====

/// Maximum call identifier length
pub const CALL_LEN: usize = 6;

/// Encoded address length (call + SSID byte)
pub const ADDRESS_LEN: usize = 7;

/// Highest sub-station identifier
pub const MAX_SSID: u8 = 15;

/// Destination + source + control + protocol id
pub const FRAME_HEADER_LEN: usize = 16;

/// Unnumbered information control byte
pub const AX25_UI_CONTROL: u8 = 0x03;

/// "No layer 3" protocol identifier
pub const AX25_PID_NO_L3: u8 = 0xF0;

/// Largest information field the modem accepts
pub const MAX_FRAME_BODY: usize = 2048;

// ===== KISS =====

/// Frame end / start sentinel
pub const KISS_FEND: u8 = 0xC0;

/// Frame escape
pub const KISS_FESC: u8 = 0xDB;

/// Escaped FEND
pub const KISS_TFEND: u8 = 0xDC;

/// Escaped FESC
pub const KISS_TFESC: u8 = 0xDD;

/// Data frame command on port 0
pub const KISS_CMD_DATA: u8 = 0x00;

/// Largest raw unit the decoder will buffer
pub const MAX_KISS_UNIT: usize = 4 * (FRAME_HEADER_LEN + MAX_FRAME_BODY);

// ===== Wrapper =====

/// Current payload wrapper version
pub const WRAPPER_VERSION: u8 = 0x01;

/// Version byte + topic length byte
pub const WRAPPER_HEADER_LEN: usize = 2;

/// Longest topic a single length byte can describe
pub const MAX_TOPIC_LEN: usize = u8::MAX as usize;
