//! Outbound connection handling.

use crate::codec::{Envelope, MessageCodec};
use crate::{NetworkError, NetworkResult, MAINNET_MAGIC};
use futures::SinkExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedWrite;
use tracing::{debug, instrument, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Deadline for a single send, from enqueue to flush.
    pub send_timeout: Duration,
    /// Frames buffered per connection before senders wait.
    pub queue_depth: usize,
    /// Network magic bytes.
    pub magic: [u8; 4],
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            queue_depth: 100,
            magic: MAINNET_MAGIC,
        }
    }
}

/// A queued envelope plus the channel its flush result is reported on.
pub type Outgoing = (Envelope, oneshot::Sender<NetworkResult<()>>);

/// Handle to an outbound connection's writer task.
///
/// Cloning the handle shares the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    addr: SocketAddr,
    tx: mpsc::Sender<Outgoing>,
}

impl ConnectionHandle {
    /// Wrap an existing writer queue.
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Outgoing>) -> Self {
        Self { addr, tx }
    }

    /// Open a TCP connection and spawn its writer task.
    #[instrument(skip(config))]
    pub async fn connect(addr: SocketAddr, config: &ConnectionConfig) -> NetworkResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        let (tx, rx) = mpsc::channel(config.queue_depth);
        let sink = FramedWrite::new(stream, MessageCodec::with_magic(config.magic));
        tokio::spawn(write_loop(addr, sink, rx));

        Ok(Self::new(addr, tx))
    }

    /// Send an envelope and wait until it has been flushed to the socket.
    pub async fn send(&self, envelope: Envelope, deadline: Duration) -> NetworkResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let result = tokio::time::timeout(deadline, async {
            self.tx
                .send((envelope, ack_tx))
                .await
                .map_err(|_| NetworkError::ConnectionClosed)?;
            ack_rx.await.map_err(|_| NetworkError::ConnectionClosed)?
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(NetworkError::Timeout(format!("send to {}", self.addr))),
        }
    }

    /// Whether the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Get the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn write_loop(
    addr: SocketAddr,
    mut sink: FramedWrite<TcpStream, MessageCodec>,
    mut rx: mpsc::Receiver<Outgoing>,
) {
    while let Some((envelope, ack)) = rx.recv().await {
        let msg = envelope.message.message_type();
        let result = sink.send(envelope).await;
        let failed = result.is_err();
        if let Err(ref e) = result {
            warn!(addr = %addr, msg = %msg, error = %e, "Send error");
        } else {
            debug!(addr = %addr, msg = %msg, "Sent message");
        }
        let _ = ack.send(result);
        if failed {
            break;
        }
    }
    debug!(addr = %addr, "Connection writer closed");
}
