//! Networking primitives.
//!
//! The client core only sees two seams:
//! - [`Transport`]: a live, full-duplex connection that queues inbound
//!   envelopes and accepts outbound ones without blocking the caller.
//! - [`Dialer`]: an async operation turning an address into a transport.
//!
//! [`TcpTransport`] is the concrete implementation: length-prefixed JSON
//! frames over TCP, with background reader/writer tasks feeding channels.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::protocol::Envelope;

/// Frames above this size are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// A live logical connection to the game server.
///
/// Every method must return promptly; callers run on the render tick.
pub trait Transport: Send {
    /// True once the connection can no longer deliver or accept messages.
    fn is_closed(&self) -> bool;

    /// Pops the next inbound envelope, if one is queued.
    fn try_recv(&mut self) -> Option<Envelope>;

    /// Queues an envelope for delivery.
    fn send(&mut self, envelope: Envelope) -> anyhow::Result<()>;
}

/// Opens transports. Runs off the tick thread and may block on network I/O.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> anyhow::Result<Box<dyn Transport>>;
}

/// Serializes an envelope into a length-prefixed frame.
pub fn encode_frame(envelope: &Envelope) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(envelope).context("serialize envelope")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame).await.context("tcp write")?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> anyhow::Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    serde_json::from_slice(&payload).context("deserialize envelope")
}

/// TCP transport driven by two background tasks.
pub struct TcpTransport {
    inbound: mpsc::UnboundedReceiver<Envelope>,
    outbound: mpsc::UnboundedSender<Envelope>,
    closed: Arc<AtomicBool>,
    peer: SocketAddr,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    /// Splits the stream and spawns its reader and writer tasks. Must be called
    /// from within a tokio runtime.
    pub fn start(stream: TcpStream) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().context("tcp peer_addr")?;
        stream.set_nodelay(true).context("tcp set_nodelay")?;
        let (mut read_half, mut write_half) = stream.into_split();

        let closed = Arc::new(AtomicBool::new(false));
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();

        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(envelope) => {
                        if in_tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "Reader stopped");
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::Release);
        });

        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &envelope).await {
                    warn!(peer = %peer, error = %e, "Writer stopped");
                    break;
                }
            }
            writer_closed.store(true, Ordering::Release);
        });

        Ok(Self {
            inbound: in_rx,
            outbound: out_tx,
            closed,
            peer,
            reader,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        self.inbound.try_recv().ok()
    }

    fn send(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("transport to {} is closed", self.peer);
        }
        self.outbound
            .send(envelope)
            .map_err(|_| anyhow::anyhow!("writer task for {} has exited", self.peer))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Dials the game server over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> anyhow::Result<Box<dyn Transport>> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("tcp connect {addr}"))?;
        let transport = TcpTransport::start(stream)?;
        info!(server = %transport.peer_addr(), "Transport established");
        Ok(Box::new(transport))
    }
}
