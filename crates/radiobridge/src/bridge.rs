//! Top-level bridge service
//!
//! [`RadioBridge`] wires the two legs to the relay and owns the cancellation
//! token that stops all of them:
//!
//! ```text
//!  MQTT broker                                  KISS modem (TCP)
//!      │                                              │
//!  MqttLeg ──BusMessage──▶ Relay ──KISS unit──▶ ModemHandle
//!  MqttHandle ◀──publish── Relay ◀──ModemInbound── ModemLeg
//! ```

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::leg::modem::{Connector, ModemLeg, TcpConnector};
use crate::leg::mqtt::MqttLeg;
use crate::leg::LegState;
use crate::relay::{Relay, RelayHandle};
use crate::stats::RelayStatsSnapshot;

/// Bridge service built from a validated configuration
pub struct RadioBridge {
    config: BridgeConfig,
    cancel: CancellationToken,
}

impl RadioBridge {
    /// Validate the configuration and create the service
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Token that stops the bridge when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start both legs and the relay, connecting to the modem over TCP
    pub fn start(self) -> BridgeHandle {
        let connector = TcpConnector::new(self.config.modem.address());
        self.start_with(connector)
    }

    /// Start with a custom modem connector
    pub fn start_with<C: Connector>(self, connector: C) -> BridgeHandle {
        let config = &self.config;
        info!(
            mqtt = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
            modem = %connector.endpoint(),
            stations = %format!("{} -> {}", config.stations.local, config.stations.peer),
            "Starting radio bridge"
        );

        let (bus_tx, bus_rx) = mpsc::channel(config.relay.queue_size);
        let (modem_tx, modem_rx) = mpsc::channel(config.relay.queue_size);

        let (mqtt_leg, mqtt) = MqttLeg::new(&config.mqtt, &config.reconnect, bus_tx, self.cancel.clone());
        let (modem_leg, modem) = ModemLeg::new(
            connector,
            &config.modem,
            &config.reconnect,
            modem_tx,
            self.cancel.clone(),
        );

        let mqtt_state = mqtt.subscribe_state();
        let modem_state = modem.subscribe_state();

        let legs = vec![mqtt_leg.spawn(), modem_leg.spawn()];
        let relay = Relay::new(config).spawn(
            mqtt,
            modem,
            bus_rx,
            modem_rx,
            config.dedup.sweep_interval,
            self.cancel.clone(),
        );

        BridgeHandle {
            cancel: self.cancel,
            relay,
            legs,
            mqtt_state,
            modem_state,
        }
    }
}

/// Handle to a running bridge
pub struct BridgeHandle {
    cancel: CancellationToken,
    relay: RelayHandle,
    legs: Vec<JoinHandle<()>>,
    mqtt_state: watch::Receiver<LegState>,
    modem_state: watch::Receiver<LegState>,
}

impl BridgeHandle {
    /// Current relay counters
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.relay.stats()
    }

    /// Current bus leg state
    pub fn mqtt_state(&self) -> LegState {
        *self.mqtt_state.borrow()
    }

    /// Current modem leg state
    pub fn modem_state(&self) -> LegState {
        *self.modem_state.borrow()
    }

    /// Watch the bus leg state
    pub fn watch_mqtt(&self) -> watch::Receiver<LegState> {
        self.mqtt_state.clone()
    }

    /// Watch the modem leg state
    pub fn watch_modem(&self) -> watch::Receiver<LegState> {
        self.modem_state.clone()
    }

    /// Stop everything and return the final counters
    pub async fn shutdown(self) -> RelayStatsSnapshot {
        info!("Radio bridge shutting down");
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait until every task has stopped, which happens once the token is cancelled
    pub async fn wait(self) -> RelayStatsSnapshot {
        for leg in self.legs {
            if let Err(e) = leg.await {
                warn!(error = %e, "Leg task failed");
            }
        }
        let stats = self.relay.join().await;
        info!(relayed = stats.relayed(), dropped = stats.dropped(), "Radio bridge stopped");
        stats
    }
}
