//! Error types for bridge operations
//!
//! Covers both legs (MQTT and KISS modem), relay hand-off and configuration.
//! None of these terminate the bridge at runtime: connection errors drive a
//! leg into backoff, everything else drops the message at hand.

use radiobridge_protocol::ProtocolError;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Connection Errors =====
    /// Connection dropped while reading or writing
    #[error("Connection lost on {leg}: {reason}")]
    ConnectionLost {
        /// Leg name
        leg: &'static str,
        /// Failure reason
        reason: String,
    },

    /// Send attempted while the leg is not connected
    #[error("{0} leg is not connected")]
    NotConnected(&'static str),

    /// Connection attempt timed out
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Write failed or exceeded the write timeout
    #[error("Send failure: {0}")]
    SendFailure(String),

    // ===== Protocol Errors =====
    /// Frame, KISS or wrapper codec error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // ===== MQTT Errors =====
    /// MQTT client error
    #[error("MQTT error: {0}")]
    Mqtt(String),

    // ===== Configuration Errors =====
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Internal channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the leg should back off and retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionLost { .. }
                | BridgeError::ConnectTimeout { .. }
                | BridgeError::Mqtt(_)
                | BridgeError::Io(_)
        )
    }

    /// Whether this came from malformed data off the wire
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, BridgeError::Protocol(_))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::ConnectionLost { .. } => "CONNECTION_LOST",
            BridgeError::NotConnected(_) => "NOT_CONNECTED",
            BridgeError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            BridgeError::SendFailure(_) => "SEND_FAILURE",
            BridgeError::Protocol(e) => e.error_code(),
            BridgeError::Mqtt(_) => "MQTT_ERROR",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Mqtt(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for BridgeError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BridgeError::ConnectionLost {
            leg: "mqtt",
            reason: err.to_string(),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::NotConnected("modem").error_code(), "NOT_CONNECTED");
        assert_eq!(
            BridgeError::from(ProtocolError::UnsupportedVersion(9)).error_code(),
            "UNSUPPORTED_VERSION"
        );
    }

    #[test]
    fn test_is_retriable() {
        assert!(BridgeError::ConnectionLost {
            leg: "modem",
            reason: "eof".into()
        }
        .is_retriable());
        assert!(BridgeError::ConnectTimeout { duration_ms: 10_000 }.is_retriable());
        assert!(!BridgeError::SendFailure("timeout".into()).is_retriable());
        assert!(!BridgeError::InvalidConfig("x".into()).is_retriable());
    }

    #[test]
    fn test_protocol_passthrough() {
        let err = BridgeError::from(ProtocolError::MalformedFrame("short".into()));
        assert!(err.is_protocol_error());
        assert_eq!(err.to_string(), "Malformed frame: short");
    }

    #[test]
    fn test_not_connected_message() {
        assert_eq!(
            BridgeError::NotConnected("modem").to_string(),
            "modem leg is not connected"
        );
    }
}
