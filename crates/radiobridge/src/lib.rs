//! MQTT to packet-radio bridge
//!
//! Relays messages both ways between an MQTT broker and a radio modem that
//! speaks KISS over TCP (Direwolf, soundmodem, a TNC behind a TCP bridge).
//! Bus messages travel over the air as AX.25 UI frames from the local station
//! to the peer station; frames addressed to the local station come back out
//! as bus publishes on their original topic.
//!
//! # Architecture
//!
//! 1. **Legs** - [`leg::mqtt::MqttLeg`] and [`leg::modem::ModemLeg`] each own
//!    one connection and reconnect it with capped exponential backoff
//! 2. **Relay** - [`relay::Relay`] runs one task per direction, applying the
//!    codecs from [`radiobridge_protocol`]
//! 3. **Loop prevention** - [`dedup::DuplicateSuppressor`] drops a
//!    topic/payload pair seen in either direction within its TTL
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use radiobridge::{BridgeConfigBuilder, RadioBridge};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfigBuilder::new(
//!         "broker.local",
//!         "msh",
//!         "N0CALL-1".parse()?,
//!         "N0CALL-2".parse()?,
//!     )
//!     .modem("127.0.0.1", 8001)
//!     .build();
//!
//!     let bridge = RadioBridge::new(config)?;
//!     let cancel = bridge.cancel_token();
//!     let handle = bridge.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     cancel.cancel();
//!     let stats = handle.wait().await;
//!     println!("relayed {} messages", stats.relayed());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bridge;
pub mod config;
pub mod dedup;
pub mod error;
pub mod leg;
pub mod relay;
pub mod stats;
pub mod test_utils;

pub use bridge::{BridgeHandle, RadioBridge};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, DedupConfig, ModemConfig, MqttConfig, ReconnectConfig,
    RelayConfig, StationConfig,
};
pub use dedup::{DuplicateSuppressor, MessageDigest, SuppressorStats};
pub use error::{BridgeError, Result};
pub use leg::modem::{Connector, ModemHandle, ModemInbound, ModemLeg, TcpConnector};
pub use leg::mqtt::{BusMessage, MqttHandle, MqttLeg};
pub use leg::{Backoff, BusPublisher, FrameSink, LegState};
pub use relay::{Disposition, Origin, Relay, RelayHandle, RelayMessage};
pub use stats::{RelayStats, RelayStatsSnapshot};

pub use config::{DEFAULT_DEDUP_TTL, DEFAULT_KISS_PORT, DEFAULT_MQTT_PORT};
pub use radiobridge_protocol::StationAddress;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
