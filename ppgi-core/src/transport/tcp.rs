//! Direct peer-to-peer transport: newline-delimited JSON over a single TCP
//! connection. The host binds and accepts one peer; the client dials with
//! retry. Lets a host/client pair run without a broker deployment.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::message::Message;

use super::{Consumer, Producer};

/// Sending half of a TCP link.
#[derive(Debug)]
pub struct TcpProducer {
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

/// Receiving half of a TCP link.
#[derive(Debug)]
pub struct TcpConsumer {
    reader: BufReader<OwnedReadHalf>,
}

/// A bound listener waiting for the peer. Binding is split from accepting so
/// startup can fail fast on an unusable address.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Binds `addr` (e.g. `0.0.0.0:7171`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("bind {addr}: {e}")))?;
        Ok(Self { listener })
    }

    /// The bound local address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("local addr: {e}")))
    }

    /// Waits for the peer and returns both transport halves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when accepting fails.
    pub async fn accept(self) -> Result<(TcpProducer, TcpConsumer)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Transport(format!("accept: {e}")))?;
        info!(%peer, "peer connected");
        Ok(split(stream, peer))
    }
}

/// Dials `addr`, retrying every `retry_interval` until the peer is up.
///
/// # Errors
///
/// Returns [`Error::Transport`] only for non-recoverable local failures;
/// connection refusals are retried indefinitely.
pub async fn connect(addr: &str, retry_interval: Duration) -> Result<(TcpProducer, TcpConsumer)> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map_err(|e| Error::Transport(format!("peer addr: {e}")))?;
                info!(%peer, "connected to peer");
                return Ok(split(stream, peer));
            }
            Err(e) => {
                warn!(addr, error = %e, "peer not reachable, retrying");
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}

fn split(stream: TcpStream, peer: SocketAddr) -> (TcpProducer, TcpConsumer) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    (
        TcpProducer { writer: BufWriter::new(write_half), peer },
        TcpConsumer { reader: BufReader::new(read_half) },
    )
}

impl Producer for TcpProducer {
    async fn send(&mut self, message: &Message) -> Result<()> {
        let mut frame = serde_json::to_vec(message)
            .map_err(|e| Error::Transport(format!("encode message: {e}")))?;
        frame.push(b'\n');
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| Error::Transport(format!("write: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush: {e}")))
    }

    fn connection_info(&self) -> String {
        format!("tcp peer {}", self.peer)
    }
}

impl Consumer for TcpConsumer {
    async fn receive(&mut self) -> Result<Message> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Transport(format!("read: {e}")))?;
        if read == 0 {
            return Err(Error::TransportClosed);
        }
        serde_json::from_str(line.trim_end()).map_err(|e| Error::Decode(e.to_string()))
    }
}
