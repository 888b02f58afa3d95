//! Configuration types for the radio bridge
//!
//! The bridge consumes an already-loaded [`BridgeConfig`]. Every component
//! receives the section it needs at construction; nothing reads global state.

use radiobridge_protocol::StationAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default KISS TCP port exposed by the modem
pub const DEFAULT_KISS_PORT: u16 = 8001;

/// Default duplicate-suppression window
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(60);

/// Shortest reconnect delay
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Longest reconnect delay
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bus-side broker connection
    pub mqtt: MqttConfig,

    /// Modem-side KISS connection
    #[serde(default)]
    pub modem: ModemConfig,

    /// Local and peer station addresses
    pub stations: StationConfig,

    /// Duplicate suppression
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Reconnection backoff, shared by both legs
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,

    /// Log verbosity (trace, debug, info, warn, error)
    #[serde(default = "default_logging_level")]
    pub logging_level: String,
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Check values that cannot be expressed in the types
    pub fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;
        self.modem.validate()?;
        self.dedup.validate()?;
        self.reconnect.validate()?;

        if self.stations.local == self.stations.peer {
            return Err(BridgeError::InvalidConfig(format!(
                "local and peer stations are both {}",
                self.stations.local
            )));
        }
        if self.relay.queue_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "relay.queue_size must be greater than zero".to_string(),
            ));
        }
        if !matches!(
            self.logging_level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(BridgeError::InvalidConfig(format!(
                "unknown logging_level '{}'",
                self.logging_level
            )));
        }
        Ok(())
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username, sent together with `password`
    #[serde(default)]
    pub username: Option<String>,

    /// Password
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier (generated when absent)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Root topic; the bridge subscribes to `<root_topic>/#`
    pub root_topic: String,

    /// Keep-alive interval
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// Use TLS with the platform trust roots
    #[serde(default)]
    pub tls: bool,

    /// Bound on a single publish hand-off to the client
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub publish_timeout: Duration,
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

impl MqttConfig {
    /// Create settings for a broker and root topic
    pub fn new(host: impl Into<String>, root_topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            client_id: None,
            root_topic: root_topic.into(),
            keep_alive: default_keep_alive(),
            tls: false,
            publish_timeout: default_write_timeout(),
        }
    }

    /// Subscription filter covering the whole root topic
    pub fn subscription(&self) -> String {
        format!("{}/#", self.root_topic.trim_end_matches('/'))
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::InvalidConfig("mqtt.host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::InvalidConfig("mqtt.port is 0".to_string()));
        }
        let root = self.root_topic.trim_end_matches('/');
        if root.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "mqtt.root_topic is empty".to_string(),
            ));
        }
        if root.contains(|c| c == '#' || c == '+') {
            return Err(BridgeError::InvalidConfig(format!(
                "mqtt.root_topic '{}' must not contain wildcards",
                self.root_topic
            )));
        }
        if self.keep_alive < Duration::from_secs(5) {
            return Err(BridgeError::InvalidConfig(format!(
                "mqtt.keep_alive {:?} is below 5s",
                self.keep_alive
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(BridgeError::InvalidConfig(
                "mqtt.username and mqtt.password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// KISS modem settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Modem host
    #[serde(default = "default_modem_host")]
    pub host: String,

    /// KISS TCP port
    #[serde(default = "default_kiss_port")]
    pub port: u16,

    /// Bound on a single connection attempt
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Bound on a single frame write
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,

    /// Socket read size
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_modem_host() -> String {
    "127.0.0.1".to_string()
}

fn default_kiss_port() -> u16 {
    DEFAULT_KISS_PORT
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_buffer_size() -> usize {
    4096
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            host: default_modem_host(),
            port: DEFAULT_KISS_PORT,
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ModemConfig {
    /// `host:port` of the KISS server
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::InvalidConfig("modem.host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::InvalidConfig("modem.port is 0".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "modem.read_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Station addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// This station; source of transmitted frames, expected destination of
    /// received ones
    pub local: StationAddress,

    /// Remote station; destination of transmitted frames
    pub peer: StationAddress,

    /// Compare SSIDs too when filtering received frames by destination
    #[serde(default)]
    pub match_ssid: bool,
}

impl StationConfig {
    /// Whether a received frame's destination is this station
    pub fn is_local(&self, destination: &StationAddress) -> bool {
        if self.match_ssid {
            destination == &self.local
        } else {
            destination.same_call(&self.local)
        }
    }
}

/// Duplicate suppression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Disable only for testing; loops become possible
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a digest suppresses repeats
    #[serde(with = "humantime_serde", default = "default_dedup_ttl")]
    pub ttl: Duration,

    /// Maximum digests held
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,

    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_dedup_ttl() -> Duration {
    DEFAULT_DEDUP_TTL
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_DEDUP_TTL,
            capacity: default_dedup_capacity(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl DedupConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.ttl.is_zero() {
            return Err(BridgeError::InvalidConfig("dedup.ttl is zero".to_string()));
        }
        if self.capacity == 0 {
            return Err(BridgeError::InvalidConfig("dedup.capacity is zero".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "dedup.sweep_interval is zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconnection backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// First delay after a failure
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Delay cap
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// A connection that lasted this long resets the delay
    #[serde(with = "humantime_serde", default = "default_stable_after")]
    pub stable_after: Duration,
}

fn default_initial_delay() -> Duration {
    MIN_RECONNECT_DELAY
}

fn default_max_delay() -> Duration {
    MAX_RECONNECT_DELAY
}

fn default_stable_after() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: MIN_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            stable_after: default_stable_after(),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_delay < MIN_RECONNECT_DELAY {
            return Err(BridgeError::InvalidConfig(format!(
                "reconnect.initial_delay {:?} is below {:?}",
                self.initial_delay, MIN_RECONNECT_DELAY
            )));
        }
        if self.max_delay > MAX_RECONNECT_DELAY {
            return Err(BridgeError::InvalidConfig(format!(
                "reconnect.max_delay {:?} is above {:?}",
                self.max_delay, MAX_RECONNECT_DELAY
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(BridgeError::InvalidConfig(format!(
                "reconnect.initial_delay {:?} exceeds max_delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Relay behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Do not transmit retained bus messages
    #[serde(default)]
    pub skip_retained: bool,

    /// Depth of each direction's hand-off queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_queue_size() -> usize {
    256
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            skip_retained: false,
            queue_size: default_queue_size(),
        }
    }
}

/// Builder for BridgeConfig
#[derive(Debug)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Start from broker, root topic and the two stations
    pub fn new(
        mqtt_host: impl Into<String>,
        root_topic: impl Into<String>,
        local: StationAddress,
        peer: StationAddress,
    ) -> Self {
        Self {
            config: BridgeConfig {
                mqtt: MqttConfig::new(mqtt_host, root_topic),
                modem: ModemConfig::default(),
                stations: StationConfig {
                    local,
                    peer,
                    match_ssid: false,
                },
                dedup: DedupConfig::default(),
                reconnect: ReconnectConfig::default(),
                relay: RelayConfig::default(),
                logging_level: default_logging_level(),
            },
        }
    }

    /// Set MQTT broker port
    pub fn mqtt_port(mut self, port: u16) -> Self {
        self.config.mqtt.port = port;
        self
    }

    /// Set MQTT credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.mqtt.username = Some(username.into());
        self.config.mqtt.password = Some(password.into());
        self
    }

    /// Set KISS modem endpoint
    pub fn modem(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.modem.host = host.into();
        self.config.modem.port = port;
        self
    }

    /// Enable or disable duplicate suppression
    pub fn dedup(mut self, enabled: bool) -> Self {
        self.config.dedup.enabled = enabled;
        self
    }

    /// Set duplicate-suppression window
    pub fn dedup_ttl(mut self, ttl: Duration) -> Self {
        self.config.dedup.ttl = ttl;
        self
    }

    /// Require SSID match on received frames
    pub fn match_ssid(mut self, enabled: bool) -> Self {
        self.config.stations.match_ssid = enabled;
        self
    }

    /// Skip retained bus messages
    pub fn skip_retained(mut self, enabled: bool) -> Self {
        self.config.relay.skip_retained = enabled;
        self
    }

    /// Set reconnect delay bounds
    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect.initial_delay = initial;
        self.config.reconnect.max_delay = max;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
