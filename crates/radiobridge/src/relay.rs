//! Relay orchestrator
//!
//! Moves messages between the legs, one task per direction:
//!
//! **Bus → modem**
//! 1. Skip retained messages when configured to
//! 2. Check duplicate suppression
//! 3. Wrap topic and payload
//! 4. Encode a UI frame, peer as destination, local as source
//! 5. KISS-frame it and write it to the modem
//!
//! **Modem → bus**
//! 1. Feed raw bytes through the KISS decoder
//! 2. Drop frames not addressed to this station, before decoding the rest
//! 3. Decode the frame and keep UI frames only
//! 4. Unwrap topic and payload
//! 5. Check duplicate suppression
//! 6. Publish on the bus
//!
//! Both directions share one [`DuplicateSuppressor`], so a message relayed one
//! way and heard back the other way is suppressed. Every failure drops only
//! the message at hand; nothing is retried or queued.

use bytes::Bytes;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use radiobridge_protocol::{frame, kiss, wrapper, KissDecoder};

use crate::config::{BridgeConfig, StationConfig};
use crate::dedup::DuplicateSuppressor;
use crate::error::{BridgeError, Result};
use crate::leg::modem::ModemInbound;
use crate::leg::mqtt::BusMessage;
use crate::leg::{BusPublisher, FrameSink};
use crate::stats::{RelayStats, RelayStatsSnapshot};

/// Leg a relay message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Publish/subscribe bus
    Bus,
    /// Radio modem
    Modem,
}

impl Origin {
    /// Leg the message is relayed to
    pub fn target(self) -> Origin {
        match self {
            Origin::Bus => Origin::Modem,
            Origin::Modem => Origin::Bus,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Bus => write!(f, "bus"),
            Origin::Modem => write!(f, "modem"),
        }
    }
}

/// Topic and payload on their way from one leg to the other
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    /// Leg it arrived on
    pub origin: Origin,
    /// Bus topic
    pub topic: String,
    /// Payload bytes, untouched
    pub payload: Bytes,
}

impl RelayMessage {
    /// Message received from the bus
    pub fn from_bus(msg: &BusMessage) -> Self {
        Self {
            origin: Origin::Bus,
            topic: msg.topic.clone(),
            payload: msg.payload.clone(),
        }
    }

    /// Message unwrapped from a radio frame
    pub fn from_modem(topic: String, payload: Bytes) -> Self {
        Self {
            origin: Origin::Modem,
            topic,
            payload,
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the other leg
    Relayed,
    /// Seen within the suppression window
    Suppressed,
    /// Not meant for this bridge (other destination, non-UI, skipped retained)
    Ignored,
    /// Failed to decode, encode or send
    Dropped,
}

/// Stateless apart from the shared suppressor and counters; clones share both
#[derive(Debug, Clone)]
pub struct Relay {
    stations: StationConfig,
    skip_retained: bool,
    dedup: DuplicateSuppressor,
    stats: Arc<RelayStats>,
}

impl Relay {
    /// Create from configuration with a fresh suppressor
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_suppressor(config, DuplicateSuppressor::from_config(&config.dedup))
    }

    /// Create with an existing suppressor
    pub fn with_suppressor(config: &BridgeConfig, dedup: DuplicateSuppressor) -> Self {
        Self {
            stations: config.stations.clone(),
            skip_retained: config.relay.skip_retained,
            dedup,
            stats: Arc::new(RelayStats::new()),
        }
    }

    /// Shared suppressor
    pub fn suppressor(&self) -> &DuplicateSuppressor {
        &self.dedup
    }

    /// Current counters
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Build the KISS unit carrying `topic` and `payload` to the peer
    pub fn encode_for_radio(&self, topic: &str, payload: &[u8]) -> Result<Bytes> {
        let body = wrapper::wrap(topic, payload)?;
        let frame = frame::encode(&self.stations.peer, &self.stations.local, &body)?;
        debug!(frame = %hex::encode(&frame), "Encoded frame");
        Ok(kiss::frame(&frame))
    }

    /// Relay one bus message to the modem
    pub async fn bus_to_modem<S>(&self, modem: &S, msg: &BusMessage) -> Disposition
    where
        S: FrameSink + ?Sized,
    {
        if msg.retain && self.skip_retained {
            debug!(topic = %msg.topic, "Skipping retained message");
            return Disposition::Ignored;
        }

        let msg = RelayMessage::from_bus(msg);
        if !self.admit(&msg) {
            return Disposition::Suppressed;
        }

        let unit = match self.encode_for_radio(&msg.topic, &msg.payload) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(
                    origin = %msg.origin,
                    topic = %msg.topic,
                    error = %e,
                    "Cannot encode bus message for radio"
                );
                self.stats.record_wrapper_error();
                return Disposition::Dropped;
            }
        };

        match modem.send_frame(unit).await {
            Ok(()) => {
                self.log_relayed(&msg);
                self.stats.record_bus_to_modem();
                Disposition::Relayed
            }
            Err(e) => {
                self.log_dropped(&msg, &e);
                self.stats.record_send_failure();
                Disposition::Dropped
            }
        }
    }

    /// Relay one decoded KISS frame to the bus
    pub async fn modem_to_bus<P>(&self, bus: &P, raw: &[u8]) -> Disposition
    where
        P: BusPublisher + ?Sized,
    {
        trace!(frame = %hex::encode(raw), "Frame from modem");

        let destination = match frame::peek_destination(raw) {
            Ok(destination) => destination,
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                self.stats.record_malformed();
                return Disposition::Dropped;
            }
        };
        if !self.stations.is_local(&destination) {
            debug!(destination = %destination, "Frame for another station");
            self.stats.record_wrong_destination();
            return Disposition::Ignored;
        }

        let decoded = match frame::decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                self.stats.record_malformed();
                return Disposition::Dropped;
            }
        };
        if !decoded.is_ui() {
            debug!(
                control = decoded.control,
                pid = decoded.pid,
                source = %decoded.source,
                "Ignoring non-UI frame"
            );
            self.stats.record_malformed();
            return Disposition::Ignored;
        }

        let (topic, payload) = match wrapper::unwrap(&decoded.body) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(source = %decoded.source, error = %e, "Dropping frame with bad wrapper");
                self.stats.record_wrapper_error();
                return Disposition::Dropped;
            }
        };

        let msg = RelayMessage::from_modem(topic, payload);
        trace!(source = %decoded.source, topic = %msg.topic, "Unwrapped frame");
        if !self.admit(&msg) {
            return Disposition::Suppressed;
        }

        match bus.publish(&msg.topic, msg.payload.clone()).await {
            Ok(()) => {
                self.log_relayed(&msg);
                self.stats.record_modem_to_bus();
                Disposition::Relayed
            }
            Err(e) => {
                self.log_dropped(&msg, &e);
                self.stats.record_publish_failure();
                Disposition::Dropped
            }
        }
    }

    /// Check-and-record in the shared suppressor
    fn admit(&self, msg: &RelayMessage) -> bool {
        if self.dedup.should_relay(&msg.topic, &msg.payload) {
            return true;
        }
        info!(origin = %msg.origin, topic = %msg.topic, "Suppressed duplicate");
        self.stats.record_duplicate();
        false
    }

    fn log_relayed(&self, msg: &RelayMessage) {
        info!(
            origin = %msg.origin,
            to = %msg.origin.target(),
            topic = %msg.topic,
            bytes = msg.payload.len(),
            "Relayed"
        );
    }

    fn log_dropped(&self, msg: &RelayMessage, error: &BridgeError) {
        warn!(
            origin = %msg.origin,
            to = %msg.origin.target(),
            topic = %msg.topic,
            error = %error,
            "Send failed, message dropped"
        );
    }

    /// Spawn both directions plus the periodic suppressor sweep
    pub fn spawn<P, S>(
        self,
        bus: P,
        modem: S,
        bus_rx: mpsc::Receiver<BusMessage>,
        modem_rx: mpsc::Receiver<ModemInbound>,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) -> RelayHandle
    where
        P: BusPublisher + 'static,
        S: FrameSink + 'static,
    {
        let mut tasks = vec![
            tokio::spawn(self.clone().run_bus_to_modem(modem, bus_rx, cancel.clone())),
            tokio::spawn(self.clone().run_modem_to_bus(bus, modem_rx, cancel.clone())),
        ];
        if self.dedup.is_enabled() {
            tasks.push(tokio::spawn(
                self.clone().run_sweep(sweep_interval, cancel),
            ));
        }

        RelayHandle {
            stats: self.stats,
            tasks,
        }
    }

    async fn run_bus_to_modem<S: FrameSink>(
        self,
        modem: S,
        mut bus_rx: mpsc::Receiver<BusMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = bus_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.bus_to_modem(&modem, &msg).await;
        }
        debug!("bus->modem relay stopped");
    }

    async fn run_modem_to_bus<P: BusPublisher>(
        self,
        bus: P,
        mut modem_rx: mpsc::Receiver<ModemInbound>,
        cancel: CancellationToken,
    ) {
        let mut decoder = KissDecoder::new();
        let mut discarded = 0;

        loop {
            let inbound = tokio::select! {
                _ = cancel.cancelled() => break,
                inbound = modem_rx.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            match inbound {
                ModemInbound::Connected => decoder.reset(),
                ModemInbound::Data(chunk) => {
                    for raw in decoder.feed(&chunk) {
                        self.modem_to_bus(&bus, &raw).await;
                    }
                    while discarded < decoder.discarded() {
                        self.stats.record_malformed();
                        discarded += 1;
                    }
                }
            }
        }
        debug!("modem->bus relay stopped");
    }

    async fn run_sweep(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.dedup.sweep_expired();
                    trace!(removed, remaining = self.dedup.len(), "Suppressor sweep");
                }
            }
        }
    }
}

/// Running relay tasks
#[derive(Debug)]
pub struct RelayHandle {
    stats: Arc<RelayStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Current counters
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait for every relay task to finish, returning the final counters
    pub async fn join(self) -> RelayStatsSnapshot {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Relay task failed");
            }
        }
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::LegState;
    use crate::test_utils::{kiss_unit_to, local_station, peer_station, TestFixture};
    use radiobridge_protocol::{StationAddress, AX25_UI_CONTROL};

    fn unkiss(unit: &[u8]) -> Bytes {
        let mut frames = KissDecoder::new().feed(unit);
        assert_eq!(frames.len(), 1);
        frames.remove(0)
    }

    #[tokio::test]
    async fn test_bus_to_modem_produces_expected_unit() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);
        let msg = BusMessage::new("msh/bridge/test", "Hello");

        assert_eq!(relay.bus_to_modem(&fixture.modem, &msg).await, Disposition::Relayed);

        let sent = fixture.modem.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], 0xC0);
        assert_eq!(sent[0][1], 0x00);
        assert_eq!(*sent[0].last().unwrap(), 0xC0);

        let decoded = frame::decode(&unkiss(&sent[0])).unwrap();
        assert_eq!(decoded.destination, peer_station());
        assert_eq!(decoded.source, local_station());
        assert_eq!(decoded.control, AX25_UI_CONTROL);
        assert_eq!(
            decoded.body.as_ref(),
            b"\x01\x0Fmsh/bridge/testHello".as_slice()
        );
        assert_eq!(relay.stats().bus_to_modem, 1);
    }

    #[tokio::test]
    async fn test_bus_duplicate_suppressed() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);
        let msg = BusMessage::new("msh/a", "x");

        relay.bus_to_modem(&fixture.modem, &msg).await;
        assert_eq!(relay.bus_to_modem(&fixture.modem, &msg).await, Disposition::Suppressed);
        assert_eq!(fixture.modem.sent().len(), 1);
        assert_eq!(relay.stats().duplicates_suppressed, 1);
    }

    #[tokio::test]
    async fn test_send_failure_drops_only_that_message() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        fixture.modem.set_state(LegState::BackingOff);
        let first = BusMessage::new("msh/a", "1");
        assert_eq!(relay.bus_to_modem(&fixture.modem, &first).await, Disposition::Dropped);

        fixture.modem.set_state(LegState::Connected);
        let second = BusMessage::new("msh/a", "2");
        assert_eq!(relay.bus_to_modem(&fixture.modem, &second).await, Disposition::Relayed);

        assert_eq!(fixture.modem.sent().len(), 1);
        assert_eq!(relay.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_modem_write_failure_counted() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        fixture.modem.fail_sends(true);
        let first = BusMessage::new("msh/a", "1");
        assert_eq!(relay.bus_to_modem(&fixture.modem, &first).await, Disposition::Dropped);

        fixture.modem.fail_sends(false);
        let second = BusMessage::new("msh/a", "2");
        assert_eq!(relay.bus_to_modem(&fixture.modem, &second).await, Disposition::Relayed);

        let stats = relay.stats();
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.bus_to_modem, 1);
    }

    #[tokio::test]
    async fn test_publish_while_bus_down_drops_only_that_message() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        fixture.bus.set_state(LegState::BackingOff);
        let lost = unkiss(&kiss_unit_to(&local_station(), "msh/a", b"lost").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &lost).await, Disposition::Dropped);
        assert_eq!(relay.stats().publish_failures, 1);

        fixture.bus.set_state(LegState::Connected);
        let next = unkiss(&kiss_unit_to(&local_station(), "msh/a", b"next").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &next).await, Disposition::Relayed);

        assert_eq!(
            fixture.bus.published(),
            vec![("msh/a".to_string(), Bytes::from_static(b"next"))]
        );
        let stats = relay.stats();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.modem_to_bus, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_while_connected() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        fixture.bus.fail_sends(true);
        let raw = unkiss(&kiss_unit_to(&local_station(), "msh/a", b"x").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Dropped);
        assert!(fixture.bus.published().is_empty());
        assert_eq!(relay.stats().publish_failures, 1);
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_is_malformed() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        let body = vec![0u8; radiobridge_protocol::MAX_FRAME_BODY];
        let mut raw = frame::encode(&local_station(), &peer_station(), &body)
            .unwrap()
            .to_vec();
        raw.push(0);
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Dropped);
        assert_eq!(relay.stats().malformed_frames, 1);
    }

    #[test]
    fn test_origin_and_message() {
        assert_eq!(Origin::Bus.target(), Origin::Modem);
        assert_eq!(Origin::Modem.target(), Origin::Bus);
        assert_eq!(Origin::Bus.to_string(), "bus");

        let msg = RelayMessage::from_bus(&BusMessage::new("msh/a", "x"));
        assert_eq!(msg.origin, Origin::Bus);
        assert_eq!(msg.topic, "msh/a");
        assert_eq!(msg.payload, Bytes::from_static(b"x"));

        let msg = RelayMessage::from_modem("msh/b".to_string(), Bytes::from_static(b"y"));
        assert_eq!(msg.origin, Origin::Modem);
    }

    #[tokio::test]
    async fn test_retained_skipped_when_configured() {
        let mut fixture = TestFixture::new();
        fixture.config.relay.skip_retained = true;
        let relay = Relay::new(&fixture.config);

        let mut msg = BusMessage::new("msh/a", "x");
        msg.retain = true;
        assert_eq!(relay.bus_to_modem(&fixture.modem, &msg).await, Disposition::Ignored);
        assert!(fixture.modem.sent().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_message_dropped() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);
        let msg = BusMessage::new("msh/a", vec![0u8; 4096]);

        assert_eq!(relay.bus_to_modem(&fixture.modem, &msg).await, Disposition::Dropped);
        assert!(fixture.modem.sent().is_empty());
    }

    #[tokio::test]
    async fn test_modem_to_bus_publishes_once() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);
        let unit = kiss_unit_to(&local_station(), "msh/bridge/test", b"Hi").unwrap();
        let raw = unkiss(&unit);

        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Relayed);
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Suppressed);

        assert_eq!(
            fixture.bus.published(),
            vec![("msh/bridge/test".to_string(), Bytes::from_static(b"Hi"))]
        );
    }

    #[tokio::test]
    async fn test_destination_filter() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        let other = StationAddress::new("W1AW", 0).unwrap();
        let raw = unkiss(&kiss_unit_to(&other, "msh/a", b"x").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Ignored);

        // Same call, different SSID still matches by default
        let same_call = StationAddress::new("N0CALL", 9).unwrap();
        let raw = unkiss(&kiss_unit_to(&same_call, "msh/a", b"y").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Relayed);

        assert_eq!(fixture.bus.published().len(), 1);
        assert_eq!(relay.stats().wrong_destination, 1);
    }

    #[tokio::test]
    async fn test_ssid_matching_when_enabled() {
        let mut fixture = TestFixture::new();
        fixture.config.stations.match_ssid = true;
        let relay = Relay::new(&fixture.config);

        let same_call = StationAddress::new("N0CALL", 9).unwrap();
        let raw = unkiss(&kiss_unit_to(&same_call, "msh/a", b"y").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Ignored);
    }

    #[tokio::test]
    async fn test_bad_wrapper_dropped() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        let raw = frame::encode(&local_station(), &peer_station(), b"\x02\x01ax").unwrap();
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Dropped);

        let raw = frame::encode(&local_station(), &peer_station(), b"\x01\x09ab").unwrap();
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Dropped);

        assert!(fixture.bus.published().is_empty());
        assert_eq!(relay.stats().wrapper_errors, 2);
    }

    #[tokio::test]
    async fn test_short_and_non_ui_frames() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        assert_eq!(relay.modem_to_bus(&fixture.bus, b"short").await, Disposition::Dropped);

        let mut raw = frame::encode(&local_station(), &peer_station(), b"\x01\x01ax")
            .unwrap()
            .to_vec();
        raw[14] = 0x13;
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Ignored);
        assert!(fixture.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_loop_across_directions_suppressed() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);

        // Sent to the radio, then heard back from it
        let msg = BusMessage::new("msh/a", "loop");
        relay.bus_to_modem(&fixture.modem, &msg).await;
        let raw = unkiss(&kiss_unit_to(&local_station(), "msh/a", b"loop").unwrap());
        assert_eq!(relay.modem_to_bus(&fixture.bus, &raw).await, Disposition::Suppressed);
    }

    #[tokio::test]
    async fn test_dedup_disabled_relays_repeats() {
        let fixture = TestFixture::without_dedup();
        let relay = Relay::new(&fixture.config);
        let msg = BusMessage::new("msh/a", "x");

        relay.bus_to_modem(&fixture.modem, &msg).await;
        relay.bus_to_modem(&fixture.modem, &msg).await;
        assert_eq!(fixture.modem.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_spawned_tasks_stop_on_cancel() {
        let fixture = TestFixture::new();
        let relay = Relay::new(&fixture.config);
        let (bus_tx, bus_rx) = mpsc::channel(8);
        let (modem_tx, modem_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = relay.spawn(
            fixture.bus.clone(),
            fixture.modem.clone(),
            bus_rx,
            modem_rx,
            Duration::from_secs(30),
            cancel.clone(),
        );

        bus_tx.send(BusMessage::new("msh/a", "1")).await.unwrap();
        let unit = kiss_unit_to(&local_station(), "msh/b", b"2").unwrap();
        modem_tx.send(ModemInbound::Connected).await.unwrap();
        modem_tx.send(ModemInbound::Data(unit)).await.unwrap();

        while handle.stats().relayed() < 2 {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        let stats = handle.join().await;
        assert_eq!(stats.bus_to_modem, 1);
        assert_eq!(stats.modem_to_bus, 1);
    }
}
