//! Test utilities for exercising the bridge without a broker or radio
//!
//! - [`MockBus`] and [`MockModem`] stand in for the legs' outbound handles and
//!   record everything sent through them.
//! - [`DuplexConnector`] hands the modem leg in-memory streams and lets the
//!   test hold the far end, as if it were the modem.
//! - [`TestFixture`] bundles a configuration with a pair of mocks.
//!
//! # Example
//!
//! ```rust,ignore
//! let fixture = TestFixture::new();
//! let relay = Relay::new(&fixture.config);
//! relay.bus_to_modem(&fixture.modem, &BusMessage::new("msh/a", "hi")).await;
//! assert_eq!(fixture.modem.sent().len(), 1);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use radiobridge_protocol::{frame, kiss, wrapper, StationAddress};

use crate::config::{BridgeConfig, BridgeConfigBuilder};
use crate::error::{BridgeError, Result};
use crate::leg::modem::Connector;
use crate::leg::{BusPublisher, FrameSink, LegState};

/// Buffer size of each in-memory modem stream
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Recording stand-in for the bus leg
#[derive(Debug, Clone)]
pub struct MockBus {
    inner: Arc<Mutex<MockState<(String, Bytes)>>>,
}

/// Recording stand-in for the modem leg
#[derive(Debug, Clone)]
pub struct MockModem {
    inner: Arc<Mutex<MockState<Bytes>>>,
}

#[derive(Debug)]
struct MockState<T> {
    state: LegState,
    fail_sends: bool,
    sent: Vec<T>,
}

impl<T> MockState<T> {
    fn connected() -> Self {
        Self {
            state: LegState::Connected,
            fail_sends: false,
            sent: Vec::new(),
        }
    }

    fn accept(&mut self, leg: &'static str, item: T) -> Result<()> {
        if self.state != LegState::Connected {
            return Err(BridgeError::NotConnected(leg));
        }
        if self.fail_sends {
            return Err(BridgeError::SendFailure("simulated failure".to_string()));
        }
        self.sent.push(item);
        Ok(())
    }
}

impl MockBus {
    /// Create a connected mock
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::connected())),
        }
    }

    /// Change the reported leg state
    pub fn set_state(&self, state: LegState) {
        self.inner.lock().state = state;
    }

    /// Make every publish fail
    pub fn fail_sends(&self, enabled: bool) {
        self.inner.lock().fail_sends = enabled;
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.inner.lock().sent.clone()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusPublisher for MockBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.inner.lock().accept("mqtt", (topic.to_string(), payload))
    }

    fn state(&self) -> LegState {
        self.inner.lock().state
    }
}

impl MockModem {
    /// Create a connected mock
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::connected())),
        }
    }

    /// Change the reported leg state
    pub fn set_state(&self, state: LegState) {
        self.inner.lock().state = state;
    }

    /// Make every write fail
    pub fn fail_sends(&self, enabled: bool) {
        self.inner.lock().fail_sends = enabled;
    }

    /// Every KISS unit written so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.inner.lock().sent.clone()
    }
}

impl Default for MockModem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSink for MockModem {
    async fn send_frame(&self, unit: Bytes) -> Result<()> {
        self.inner.lock().accept("modem", unit)
    }

    fn state(&self) -> LegState {
        self.inner.lock().state
    }
}

#[derive(Debug)]
struct ConnectorInner {
    remote_tx: mpsc::UnboundedSender<DuplexStream>,
    remote_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    refuse: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
}

/// In-memory [`Connector`] for the modem leg
///
/// Every successful `connect` creates a duplex pair; the leg gets one end and
/// the test picks up the other with [`accept`](Self::accept).
#[derive(Debug, Clone)]
pub struct DuplexConnector {
    inner: Arc<ConnectorInner>,
}

impl DuplexConnector {
    /// Create a connector that accepts every attempt
    pub fn new() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ConnectorInner {
                remote_tx,
                remote_rx: tokio::sync::Mutex::new(remote_rx),
                refuse: AtomicUsize::new(0),
                attempts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: usize) {
        self.inner.refuse.store(n, Ordering::SeqCst);
    }

    /// Wait for the leg to connect and return the modem's end
    pub async fn accept(&self) -> Option<DuplexStream> {
        self.inner.remote_rx.lock().await.recv().await
    }

    /// When each connection attempt happened
    pub fn attempts(&self) -> Vec<Instant> {
        self.inner.attempts.lock().clone()
    }

    /// Gaps between consecutive attempts
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        self.attempts()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

impl Default for DuplexConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> std::io::Result<DuplexStream> {
        self.inner.attempts.lock().push(Instant::now());

        let refused = self
            .inner
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "simulated refusal",
            ));
        }

        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        self.inner.remote_tx.send(remote).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connector dropped")
        })?;
        Ok(local)
    }

    fn endpoint(&self) -> String {
        "duplex".to_string()
    }
}

/// Local station used by fixtures
pub fn local_station() -> StationAddress {
    StationAddress::new("N0CALL", 1).expect("valid fixture address")
}

/// Peer station used by fixtures
pub fn peer_station() -> StationAddress {
    StationAddress::new("N0PEER", 2).expect("valid fixture address")
}

/// Configuration with root topic `msh` and the fixture stations
pub fn test_config() -> BridgeConfig {
    BridgeConfigBuilder::new("127.0.0.1", "msh", local_station(), peer_station()).build()
}

/// Build the KISS unit a peer would transmit to `destination`
pub fn kiss_unit_to(
    destination: &StationAddress,
    topic: &str,
    payload: &[u8],
) -> Result<Bytes> {
    let body = wrapper::wrap(topic, payload)?;
    let frame = frame::encode(destination, &peer_station(), &body)?;
    Ok(kiss::frame(&frame))
}

/// Pre-configured scenario for relay tests
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// Bridge configuration
    pub config: BridgeConfig,
    /// Bus stand-in
    pub bus: MockBus,
    /// Modem stand-in
    pub modem: MockModem,
}

impl TestFixture {
    /// Both mocks connected, default configuration
    pub fn new() -> Self {
        Self {
            config: test_config(),
            bus: MockBus::new(),
            modem: MockModem::new(),
        }
    }

    /// Same as [`new`](Self::new) with duplicate suppression turned off
    pub fn without_dedup() -> Self {
        let mut fixture = Self::new();
        fixture.config.dedup.enabled = false;
        fixture
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
