//! Topic-preserving payload wrapper carried in the frame body
//!
//! ```text
//! byte 0        version (0x01)
//! byte 1        topic length N
//! 2..2+N        UTF-8 topic
//! 2+N..         payload, untouched
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::{MAX_TOPIC_LEN, WRAPPER_HEADER_LEN, WRAPPER_VERSION};

/// Topic and payload travelling together over the radio link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPayload {
    topic: String,
    payload: Bytes,
}

impl WrappedPayload {
    /// Create a wrapper, rejecting topics longer than 255 bytes
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self> {
        let topic = topic.into();
        if topic.len() > MAX_TOPIC_LEN {
            return Err(ProtocolError::TopicTooLong {
                len: topic.len(),
                max: MAX_TOPIC_LEN,
            });
        }
        Ok(Self {
            topic,
            payload: payload.into(),
        })
    }

    /// Original bus topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Original bus payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Split into topic and payload
    pub fn into_parts(self) -> (String, Bytes) {
        (self.topic, self.payload)
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(WRAPPER_HEADER_LEN + self.topic.len() + self.payload.len());
        out.put_u8(WRAPPER_VERSION);
        // Length checked in the constructor
        out.put_u8(self.topic.len() as u8);
        out.put_slice(self.topic.as_bytes());
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Parse wire bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some(&version) = data.first() else {
            return Err(ProtocolError::TruncatedWrapper {
                expected: WRAPPER_HEADER_LEN,
                actual: 0,
            });
        };
        if version != WRAPPER_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        if data.len() < WRAPPER_HEADER_LEN {
            return Err(ProtocolError::TruncatedWrapper {
                expected: WRAPPER_HEADER_LEN,
                actual: data.len(),
            });
        }

        let topic_len = usize::from(data[1]);
        let topic_end = WRAPPER_HEADER_LEN + topic_len;
        if data.len() < topic_end {
            return Err(ProtocolError::TruncatedWrapper {
                expected: topic_end,
                actual: data.len(),
            });
        }

        let topic = std::str::from_utf8(&data[WRAPPER_HEADER_LEN..topic_end])
            .map_err(|_| ProtocolError::InvalidTopic)?;

        Ok(Self {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(&data[topic_end..]),
        })
    }
}

/// Wrap a topic and payload for transmission
pub fn wrap(topic: &str, payload: &[u8]) -> Result<Bytes> {
    Ok(WrappedPayload::new(topic, Bytes::copy_from_slice(payload))?.to_bytes())
}

/// Recover topic and payload from wire bytes
pub fn unwrap(data: &[u8]) -> Result<(String, Bytes)> {
    Ok(WrappedPayload::from_bytes(data)?.into_parts())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_layout() {
        let bytes = wrap("msh/bridge/test", b"Hello").unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x01, 0x0F, 0x6D, 0x73, 0x68, 0x2F, 0x62, 0x72, 0x69, 0x64, 0x67, 0x65, 0x2F,
                0x74, 0x65, 0x73, 0x74, 0x48, 0x65, 0x6C, 0x6C, 0x6F
            ]
        );
    }

    #[test]
    fn test_topic_length_limits() {
        let max = "t".repeat(255);
        let (topic, payload) = unwrap(&wrap(&max, b"").unwrap()).unwrap();
        assert_eq!(topic, max);
        assert!(payload.is_empty());

        assert!(matches!(
            wrap(&"t".repeat(256), b""),
            Err(ProtocolError::TopicTooLong { len: 256, .. })
        ));
    }

    #[test]
    fn test_empty_topic() {
        let (topic, payload) = unwrap(&wrap("", b"data").unwrap()).unwrap();
        assert_eq!(topic, "");
        assert_eq!(&payload[..], b"data");
    }

    #[test]
    fn test_multibyte_topic_counts_bytes() {
        let topic = "状态/温度";
        let bytes = wrap(topic, b"1").unwrap();
        assert_eq!(usize::from(bytes[1]), topic.len());
        assert_eq!(unwrap(&bytes).unwrap().0, topic);
    }

    #[test]
    fn test_unsupported_version() {
        assert_eq!(
            unwrap(&[0x02, 0x00]),
            Err(ProtocolError::UnsupportedVersion(0x02))
        );
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(unwrap(&[]), Err(ProtocolError::TruncatedWrapper { .. })));
        assert!(matches!(unwrap(&[0x01]), Err(ProtocolError::TruncatedWrapper { .. })));
        assert_eq!(
            unwrap(&[0x01, 0x05, b'a', b'b']),
            Err(ProtocolError::TruncatedWrapper {
                expected: 7,
                actual: 4
            })
        );
    }

    #[test]
    fn test_invalid_utf8_topic() {
        assert_eq!(
            unwrap(&[0x01, 0x02, 0xFF, 0xFE, b'x']),
            Err(ProtocolError::InvalidTopic)
        );
    }
}
