//! Bus leg: the MQTT broker connection
//!
//! Wraps a `rumqttc` client and event loop. The run loop polls the event loop,
//! subscribes to `<root_topic>/#` on every connection acknowledgment and hands
//! incoming publishes to the relay as [`BusMessage`]s. When polling fails the
//! leg backs off with the shared policy before letting the event loop
//! reconnect.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{sleep_or_cancel, Backoff, BusPublisher, LegState, LegStatus};
use crate::config::{MqttConfig, ReconnectConfig};
use crate::error::{BridgeError, Result};

const LEG: &str = "mqtt";

/// Requests buffered between the client handle and the event loop
const CLIENT_CAPACITY: usize = 64;

/// Time allowed to flush the disconnect packet on shutdown
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
    /// Broker delivered it as a retained message
    pub retain: bool,
}

impl BusMessage {
    /// Create a non-retained message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Handle for publishing to the bus and observing its state
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    state: watch::Receiver<LegState>,
    publish_timeout: Duration,
}

impl MqttHandle {
    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LegState> {
        self.state.clone()
    }
}

#[async_trait]
impl BusPublisher for MqttHandle {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if *self.state.borrow() != LegState::Connected {
            return Err(BridgeError::NotConnected(LEG));
        }

        let publish = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec());

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(result) => result.map_err(BridgeError::from),
            Err(_) => Err(BridgeError::SendFailure(format!(
                "publish hand-off timed out after {:?}",
                self.publish_timeout
            ))),
        }
    }

    fn state(&self) -> LegState {
        *self.state.borrow()
    }
}

/// Connection manager for the bus side
pub struct MqttLeg {
    client: AsyncClient,
    eventloop: EventLoop,
    subscription: String,
    reconnect: ReconnectConfig,
    inbound: mpsc::Sender<BusMessage>,
    status: LegStatus,
    cancel: CancellationToken,
}

impl MqttLeg {
    /// Create the leg and its handle; nothing connects until [`run`](Self::run)
    pub fn new(
        config: &MqttConfig,
        reconnect: &ReconnectConfig,
        inbound: mpsc::Sender<BusMessage>,
        cancel: CancellationToken,
    ) -> (Self, MqttHandle) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), CLIENT_CAPACITY);
        let (status, state) = LegStatus::new(LEG);

        let handle = MqttHandle {
            client: client.clone(),
            state,
            publish_timeout: config.publish_timeout,
        };

        let leg = Self {
            client,
            eventloop,
            subscription: config.subscription(),
            reconnect: reconnect.clone(),
            inbound,
            status,
            cancel,
        };

        (leg, handle)
    }

    /// Spawn the run loop onto the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll the broker connection until cancelled
    pub async fn run(mut self) {
        let mut backoff = Backoff::from_config(&self.reconnect);
        let mut connected_at: Option<Instant> = None;
        info!(subscription = %self.subscription, "Starting MQTT leg");

        self.status.set(LegState::Connecting);

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected_at = Some(Instant::now());
                    self.status.set(LegState::Connected);
                    match self.client.try_subscribe(self.subscription.as_str(), QoS::AtMostOnce) {
                        Ok(()) => info!(filter = %self.subscription, "Subscribing"),
                        Err(e) => warn!(filter = %self.subscription, error = %e, "Subscribe failed"),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "MQTT publish received");
                    let msg = BusMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                        retain: publish.retain,
                    };
                    if self.inbound.send(msg).await.is_err() {
                        debug!("Relay receiver closed, stopping MQTT leg");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, "Subscription acknowledged");
                }
                Ok(other) => {
                    trace!(event = ?other, "MQTT event");
                }
                Err(e) => {
                    let err = BridgeError::from(e);
                    warn!(error = %err, "MQTT connection error");

                    if connected_at
                        .take()
                        .is_some_and(|t| t.elapsed() >= self.reconnect.stable_after)
                    {
                        backoff.reset();
                    }

                    self.status.set(LegState::BackingOff);
                    let delay = backoff.next_delay();
                    info!(delay = ?delay, "Reconnecting to MQTT broker after delay");
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        break;
                    }
                    self.status.set(LegState::Connecting);
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if self.status.current() == LegState::Connected {
            if let Err(e) = self.client.try_disconnect() {
                debug!(error = %e, "Disconnect request failed");
            } else {
                let eventloop = &mut self.eventloop;
                let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
                    while eventloop.poll().await.is_ok() {}
                })
                .await;
            }
        }
        self.status.set(LegState::Disconnected);
        info!("MQTT leg stopped");
    }
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let client_id = config.client_id.clone().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("radiobridge-{}", &id[..8])
    });

    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig::new("127.0.0.1", "msh")
    }

    #[test]
    fn test_options_from_config() {
        let mut config = config();
        config.client_id = Some("bridge-a".to_string());
        config.port = 1884;
        config.keep_alive = Duration::from_secs(30);

        let options = mqtt_options(&config);
        assert_eq!(options.client_id(), "bridge-a");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
    }

    #[test]
    fn test_generated_client_id() {
        let options = mqtt_options(&config());
        assert!(options.client_id().starts_with("radiobridge-"));
        assert_eq!(options.client_id().len(), "radiobridge-".len() + 8);
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_disconnected() {
        let (tx, _rx) = mpsc::channel(4);
        let (_leg, handle) = MqttLeg::new(
            &config(),
            &ReconnectConfig::default(),
            tx,
            CancellationToken::new(),
        );

        assert_eq!(BusPublisher::state(&handle), LegState::Disconnected);
        let err = handle
            .publish("msh/test", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected("mqtt")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel_while_backing_off() {
        let mut config = config();
        // Nothing listens on port 1
        config.port = 1;
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let (leg, handle) = MqttLeg::new(&config, &ReconnectConfig::default(), tx, cancel.clone());
        let mut state = handle.subscribe_state();
        let task = leg.spawn();

        state
            .wait_for(|s| *s == LegState::BackingOff)
            .await
            .unwrap();
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(BusPublisher::state(&handle), LegState::Disconnected);
    }
}
