//! Error types for the radiobridge wire codecs

use thiserror::Error;

/// Errors raised while encoding or decoding bridge wire formats
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame header too short or address chain not terminated
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Wrapper version byte not recognised
    #[error("Unsupported wrapper version: 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// Wrapper shorter than its header claims
    #[error("Truncated wrapper: need {expected} bytes, got {actual}")]
    TruncatedWrapper {
        /// Bytes required by the header
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Station address outside the allowed alphabet or range
    #[error("Invalid station address: {0}")]
    InvalidAddress(String),

    /// Topic does not fit the single length byte
    #[error("Topic too long: {len} bytes (max {max})")]
    TopicTooLong {
        /// Encoded topic length
        len: usize,
        /// Maximum encodable length
        max: usize,
    },

    /// Topic bytes are not valid UTF-8
    #[error("Topic is not valid UTF-8")]
    InvalidTopic,

    /// Frame body exceeds the modem's information field limit
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Body size
        size: usize,
        /// Maximum allowed body size
        max: usize,
    },
}

impl ProtocolError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::MalformedFrame(_) => "MALFORMED_FRAME",
            ProtocolError::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            ProtocolError::TruncatedWrapper { .. } => "TRUNCATED_WRAPPER",
            ProtocolError::InvalidAddress(_) => "INVALID_ADDRESS",
            ProtocolError::TopicTooLong { .. } => "TOPIC_TOO_LONG",
            ProtocolError::InvalidTopic => "INVALID_TOPIC",
            ProtocolError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
        }
    }

    /// Whether this error came from decoding a payload wrapper
    pub fn is_wrapper_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedVersion(_)
                | ProtocolError::TruncatedWrapper { .. }
                | ProtocolError::InvalidTopic
        )
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ProtocolError::UnsupportedVersion(2).error_code(),
            "UNSUPPORTED_VERSION"
        );
        assert_eq!(
            ProtocolError::MalformedFrame("short".into()).error_code(),
            "MALFORMED_FRAME"
        );
    }

    #[test]
    fn test_wrapper_errors() {
        assert!(ProtocolError::UnsupportedVersion(7).is_wrapper_error());
        assert!(ProtocolError::TruncatedWrapper {
            expected: 10,
            actual: 4
        }
        .is_wrapper_error());
        assert!(!ProtocolError::MalformedFrame("x".into()).is_wrapper_error());
    }

    #[test]
    fn test_display_includes_sizes() {
        let err = ProtocolError::FrameTooLarge {
            size: 4000,
            max: 2048,
        };
        assert!(err.to_string().contains("4000"));
        assert!(err.to_string().contains("2048"));
        assert_eq!(
            ProtocolError::UnsupportedVersion(0x02).to_string(),
            "Unsupported wrapper version: 0x02"
        );
    }
}
