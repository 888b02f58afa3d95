//! AX.25 unnumbered-information frame codec
//!
//! Layout (16-byte header, then body):
//!
//! ```text
//! 0..7    destination address
//! 7..14   source address
//! 14      control (0x03, UI)
//! 15      protocol id (0xF0, no layer 3)
//! 16..    body
//! ```
//!
//! Only two-address frames are produced or accepted.

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::StationAddress;
use crate::error::{ProtocolError, Result};
use crate::{ADDRESS_LEN, AX25_PID_NO_L3, AX25_UI_CONTROL, FRAME_HEADER_LEN, MAX_FRAME_BODY};

/// Decoded link-layer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedFrame {
    /// Destination station
    pub destination: StationAddress,
    /// Source station
    pub source: StationAddress,
    /// Control byte
    pub control: u8,
    /// Protocol identifier byte
    pub pid: u8,
    /// Opaque information field
    pub body: Bytes,
}

impl AddressedFrame {
    /// Build a UI frame, rejecting bodies above [`MAX_FRAME_BODY`]
    pub fn ui(
        destination: StationAddress,
        source: StationAddress,
        body: impl Into<Bytes>,
    ) -> Result<Self> {
        let body = body.into();
        if body.len() > MAX_FRAME_BODY {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_BODY,
            });
        }
        Ok(Self {
            destination,
            source,
            control: AX25_UI_CONTROL,
            pid: AX25_PID_NO_L3,
            body,
        })
    }

    /// Whether this is an unnumbered-information frame without layer 3
    pub fn is_ui(&self) -> bool {
        self.control == AX25_UI_CONTROL && self.pid == AX25_PID_NO_L3
    }

    /// Serialize to on-air bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + self.body.len());
        out.put_slice(&self.destination.encode());
        out.put_slice(&self.source.encode());
        out.put_u8(self.control);
        out.put_u8(self.pid);
        out.put_slice(&self.body);
        out.freeze()
    }
}

/// Encode a UI frame from `source` to `destination` carrying `body`
pub fn encode(destination: &StationAddress, source: &StationAddress, body: &[u8]) -> Result<Bytes> {
    let frame = AddressedFrame::ui(
        destination.clone(),
        source.clone(),
        Bytes::copy_from_slice(body),
    )?;
    Ok(frame.to_bytes())
}

/// Decode a frame
///
/// Fails with `MalformedFrame` when shorter than the 16-byte header or when
/// either address lacks the last-address bit, and with `FrameTooLarge` when
/// the body exceeds [`MAX_FRAME_BODY`].
pub fn decode(bytes: &[u8]) -> Result<AddressedFrame> {
    check_header_len(bytes)?;
    let body_len = bytes.len() - FRAME_HEADER_LEN;
    if body_len > MAX_FRAME_BODY {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_BODY,
        });
    }

    let destination = StationAddress::decode(&bytes[..ADDRESS_LEN])?;
    let source = StationAddress::decode(&bytes[ADDRESS_LEN..2 * ADDRESS_LEN])?;

    Ok(AddressedFrame {
        destination,
        source,
        control: bytes[2 * ADDRESS_LEN],
        pid: bytes[2 * ADDRESS_LEN + 1],
        body: Bytes::copy_from_slice(&bytes[FRAME_HEADER_LEN..]),
    })
}

/// Decode only the destination address
///
/// Lets the caller filter by destination before touching the rest of the
/// frame.
pub fn peek_destination(bytes: &[u8]) -> Result<StationAddress> {
    check_header_len(bytes)?;
    StationAddress::decode(&bytes[..ADDRESS_LEN])
}

fn check_header_len(bytes: &[u8]) -> Result<()> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame is {} bytes, header needs {}",
            bytes.len(),
            FRAME_HEADER_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> StationAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_encode_header() {
        let bytes = encode(&addr("PEER-2"), &addr("LOCAL-1"), b"body").unwrap();

        assert_eq!(bytes.len(), FRAME_HEADER_LEN + 4);
        assert_eq!(bytes[0], b'P' << 1);
        assert_eq!(bytes[6], 0x60 | (2 << 1) | 0x01);
        assert_eq!(bytes[7], b'L' << 1);
        assert_eq!(bytes[13], 0x60 | (1 << 1) | 0x01);
        assert_eq!(bytes[14], 0x03);
        assert_eq!(bytes[15], 0xF0);
        assert_eq!(&bytes[16..], b"body");
    }

    #[test]
    fn test_empty_body() {
        let frame = decode(&encode(&addr("A"), &addr("B"), &[]).unwrap()).unwrap();
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_short_frame_is_malformed() {
        let bytes = encode(&addr("A"), &addr("B"), &[]).unwrap();
        assert!(matches!(
            decode(&bytes[..15]),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(peek_destination(&bytes[..10]).is_err());
    }

    #[test]
    fn test_unterminated_source_is_malformed() {
        let mut bytes = encode(&addr("A"), &addr("B"), b"x").unwrap().to_vec();
        bytes[13] &= !0x01;
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_peek_destination() {
        let bytes = encode(&addr("DEST-4"), &addr("SRC"), b"ignored").unwrap();
        assert_eq!(peek_destination(&bytes).unwrap(), addr("DEST-4"));
    }

    #[test]
    fn test_body_limit() {
        let body = vec![0u8; MAX_FRAME_BODY + 1];
        assert!(matches!(
            encode(&addr("A"), &addr("B"), &body),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert!(encode(&addr("A"), &addr("B"), &body[..MAX_FRAME_BODY]).is_ok());
    }

    #[test]
    fn test_decode_rejects_oversized_body() {
        let mut bytes = encode(&addr("A"), &addr("B"), &vec![0x55; MAX_FRAME_BODY])
            .unwrap()
            .to_vec();
        assert_eq!(decode(&bytes).unwrap().body.len(), MAX_FRAME_BODY);

        bytes.push(0x55);
        assert_eq!(
            decode(&bytes),
            Err(ProtocolError::FrameTooLarge {
                size: MAX_FRAME_BODY + 1,
                max: MAX_FRAME_BODY
            })
        );
    }

    #[test]
    fn test_non_ui_frame_decodes() {
        let mut bytes = encode(&addr("A"), &addr("B"), b"x").unwrap().to_vec();
        bytes[14] = 0x3F;
        let frame = decode(&bytes).unwrap();
        assert!(!frame.is_ui());
    }
}
