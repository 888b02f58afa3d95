//! Leg connection managers
//!
//! A leg is one side of the bridge with its own connection lifecycle:
//!
//! - [`mqtt::MqttLeg`] - the publish/subscribe bus
//! - [`modem::ModemLeg`] - the KISS TCP channel to the radio modem
//!
//! Both run the same state machine:
//!
//! ```text
//! Disconnected → Connecting → Connected
//!                    ▲            │ read/write failure, close
//!                    │            ▼
//!                    └──── BackingOff (1s, 2s, 4s … 60s)
//! ```
//!
//! Retries never give up; only cancellation stops a leg. The relay observes
//! the state through [`LegStatus`] but never sets it.

pub mod modem;
pub mod mqtt;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ReconnectConfig;
use crate::error::Result;

/// Connection state of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    /// Not connected and not trying (initial, or after shutdown)
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected; sends are accepted
    Connected,
    /// Waiting before the next attempt
    BackingOff,
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegState::Disconnected => write!(f, "disconnected"),
            LegState::Connecting => write!(f, "connecting"),
            LegState::Connected => write!(f, "connected"),
            LegState::BackingOff => write!(f, "backing-off"),
        }
    }
}

/// Writer side of a leg's state, owned by the leg's run loop
#[derive(Debug)]
pub(crate) struct LegStatus {
    leg: &'static str,
    tx: watch::Sender<LegState>,
}

impl LegStatus {
    pub(crate) fn new(leg: &'static str) -> (Self, watch::Receiver<LegState>) {
        let (tx, rx) = watch::channel(LegState::Disconnected);
        (Self { leg, tx }, rx)
    }

    pub(crate) fn current(&self) -> LegState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, state: LegState) {
        let previous = self.tx.send_replace(state);
        if previous == state {
            return;
        }
        match state {
            LegState::Connected => info!(leg = self.leg, "Leg connected"),
            LegState::BackingOff => warn!(leg = self.leg, from = %previous, "Leg backing off"),
            _ => info!(leg = self.leg, from = %previous, to = %state, "Leg state changed"),
        }
    }
}

/// Exponential reconnect delay, doubling from the initial delay to the cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create with explicit bounds
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Create from configuration
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay, config.max_delay)
    }

    /// Delay to wait now; the following call returns double, up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Sleep unless cancelled first; returns `false` when cancelled
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Outbound capability of the bus leg
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish a message; fails fast when the leg is not connected
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Current leg state
    fn state(&self) -> LegState;
}

/// Outbound capability of the modem leg
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Write one KISS unit; fails fast when the leg is not connected
    async fn send_frame(&self, unit: Bytes) -> Result<()>;

    /// Current leg state
    fn state(&self) -> LegState;
}
