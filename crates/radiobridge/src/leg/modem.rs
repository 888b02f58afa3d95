//! Modem leg: the KISS TCP channel to the radio modem
//!
//! The run loop owns connecting, reading and reconnecting. Raw byte chunks go
//! to the relay as [`ModemInbound::Data`]; KISS decoding happens there. A
//! [`ModemInbound::Connected`] marker precedes the first chunk of every new
//! connection so the relay can drop any half-received unit from the old one.
//!
//! Writes go through [`ModemHandle`], which shares the current connection's
//! write half with the run loop. A failed or timed-out write tears the
//! connection down and the run loop reconnects. Nothing is queued while the
//! modem is away.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{sleep_or_cancel, Backoff, FrameSink, LegState, LegStatus};
use crate::config::{ModemConfig, ReconnectConfig};
use crate::error::{BridgeError, Result};

const LEG: &str = "modem";

/// Opens byte streams to the modem
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by a successful connection
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a new connection
    async fn connect(&self) -> std::io::Result<Self::Stream>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}

/// Plain TCP connector for a KISS server such as Direwolf
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Create a connector for `host:port`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}

/// What the modem leg delivers to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemInbound {
    /// A new connection was established
    Connected,
    /// Raw bytes read from the connection
    Data(Bytes),
}

struct ActiveConnection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Cancelled when a write fails so the read loop stops too
    token: CancellationToken,
}

#[derive(Default)]
struct Shared {
    active: Mutex<Option<ActiveConnection>>,
}

/// Handle for writing to the modem and observing its state
#[derive(Clone)]
pub struct ModemHandle {
    shared: Arc<Shared>,
    state: watch::Receiver<LegState>,
    write_timeout: Duration,
}

impl ModemHandle {
    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LegState> {
        self.state.clone()
    }

    async fn write_unit(&self, unit: &[u8]) -> Result<()> {
        let mut active = self.shared.active.lock().await;
        let Some(conn) = active.as_mut() else {
            return Err(BridgeError::NotConnected(LEG));
        };

        let write = async {
            conn.writer.write_all(unit).await?;
            conn.writer.flush().await
        };

        let failure = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write timed out after {:?}", self.write_timeout),
        };

        if let Some(conn) = active.take() {
            conn.token.cancel();
        }
        Err(BridgeError::SendFailure(failure))
    }
}

#[async_trait]
impl FrameSink for ModemHandle {
    async fn send_frame(&self, unit: Bytes) -> Result<()> {
        self.write_unit(&unit).await?;
        trace!(bytes = unit.len(), "KISS unit written");
        Ok(())
    }

    fn state(&self) -> LegState {
        *self.state.borrow()
    }
}

/// How a connection ended
enum ReadEnd {
    Shutdown,
    Lost(String),
}

/// Connection manager for the modem side
pub struct ModemLeg<C: Connector> {
    connector: C,
    config: ModemConfig,
    reconnect: ReconnectConfig,
    inbound: mpsc::Sender<ModemInbound>,
    shared: Arc<Shared>,
    status: LegStatus,
    cancel: CancellationToken,
}

impl<C: Connector> ModemLeg<C> {
    /// Create the leg and its handle; nothing connects until [`run`](Self::run)
    pub fn new(
        connector: C,
        config: &ModemConfig,
        reconnect: &ReconnectConfig,
        inbound: mpsc::Sender<ModemInbound>,
        cancel: CancellationToken,
    ) -> (Self, ModemHandle) {
        let shared = Arc::new(Shared::default());
        let (status, state) = LegStatus::new(LEG);

        let handle = ModemHandle {
            shared: shared.clone(),
            state,
            write_timeout: config.write_timeout,
        };

        let leg = Self {
            connector,
            config: config.clone(),
            reconnect: reconnect.clone(),
            inbound,
            shared,
            status,
            cancel,
        };

        (leg, handle)
    }

    /// Spawn the run loop onto the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect, read and reconnect until cancelled
    pub async fn run(self) {
        let endpoint = self.connector.endpoint();
        let mut backoff = Backoff::from_config(&self.reconnect);
        info!(endpoint = %endpoint, "Starting modem leg");

        while !self.cancel.is_cancelled() {
            self.status.set(LegState::Connecting);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = tokio::time::timeout(self.config.connect_timeout, self.connector.connect()) => r,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    let started = Instant::now();
                    match self.serve(stream).await {
                        ReadEnd::Shutdown => break,
                        ReadEnd::Lost(reason) => {
                            let err = BridgeError::ConnectionLost { leg: LEG, reason };
                            warn!(endpoint = %endpoint, error = %err, "Modem connection lost");
                        }
                    }
                    if started.elapsed() >= self.reconnect.stable_after {
                        backoff.reset();
                    }
                }
                Ok(Err(e)) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to connect to modem");
                }
                Err(_) => {
                    let err = BridgeError::ConnectTimeout {
                        duration_ms: self.config.connect_timeout.as_millis() as u64,
                    };
                    warn!(endpoint = %endpoint, error = %err, "Failed to connect to modem");
                }
            }

            self.status.set(LegState::BackingOff);
            let delay = backoff.next_delay();
            info!(delay = ?delay, "Reconnecting to modem after delay");
            if !sleep_or_cancel(delay, &self.cancel).await {
                break;
            }
        }

        self.shared.active.lock().await.take();
        self.status.set(LegState::Disconnected);
        info!("Modem leg stopped");
    }

    /// Run one connection until it fails or shutdown is requested
    async fn serve(&self, stream: C::Stream) -> ReadEnd {
        let (reader, writer) = tokio::io::split(stream);
        let token = self.cancel.child_token();

        *self.shared.active.lock().await = Some(ActiveConnection {
            writer: Box::new(writer),
            token: token.clone(),
        });
        self.status.set(LegState::Connected);

        if self.inbound.send(ModemInbound::Connected).await.is_err() {
            return ReadEnd::Shutdown;
        }

        let end = self.read_loop(reader, &token).await;

        // Drop the write half unless a failed write already did
        self.shared.active.lock().await.take();
        end
    }

    async fn read_loop(&self, mut reader: ReadHalf<C::Stream>, token: &CancellationToken) -> ReadEnd {
        let mut buffer = BytesMut::with_capacity(self.config.read_buffer_size);

        loop {
            buffer.reserve(self.config.read_buffer_size);

            let read = tokio::select! {
                _ = token.cancelled() => {
                    return if self.cancel.is_cancelled() {
                        ReadEnd::Shutdown
                    } else {
                        ReadEnd::Lost("write failure".to_string())
                    };
                }
                r = reader.read_buf(&mut buffer) => r,
            };

            match read {
                Ok(0) => return ReadEnd::Lost("closed by modem".to_string()),
                Ok(n) => {
                    debug!(bytes = n, "Read from modem");
                    let chunk = buffer.split().freeze();
                    if self.inbound.send(ModemInbound::Data(chunk)).await.is_err() {
                        return ReadEnd::Shutdown;
                    }
                }
                Err(e) => return ReadEnd::Lost(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::DuplexConnector;

    fn fast_config() -> (ModemConfig, ReconnectConfig) {
        let modem = ModemConfig {
            write_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        (modem, ReconnectConfig::default())
    }

    #[tokio::test]
    async fn test_send_when_disconnected_fails_fast() {
        let (modem, reconnect) = fast_config();
        let (tx, _rx) = mpsc::channel(8);
        let (_leg, handle) = ModemLeg::new(
            DuplexConnector::new(),
            &modem,
            &reconnect,
            tx,
            CancellationToken::new(),
        );

        assert_eq!(FrameSink::state(&handle), LegState::Disconnected);
        let err = handle
            .send_frame(Bytes::from_static(b"\xC0\x00x\xC0"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected("modem")));
    }

    #[tokio::test]
    async fn test_reads_and_writes() {
        let (modem, reconnect) = fast_config();
        let connector = DuplexConnector::new();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (leg, handle) = ModemLeg::new(connector.clone(), &modem, &reconnect, tx, cancel.clone());
        let task = leg.spawn();

        let mut remote = connector.accept().await.unwrap();
        assert_eq!(rx.recv().await, Some(ModemInbound::Connected));

        remote.write_all(b"abc").await.unwrap();
        assert_eq!(rx.recv().await, Some(ModemInbound::Data(Bytes::from_static(b"abc"))));

        handle.send_frame(Bytes::from_static(b"xyz")).await.unwrap();
        let mut out = [0u8; 3];
        remote.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"xyz");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(FrameSink::state(&handle), LegState::Disconnected);
    }
}
