//! # TCP Connections
//!
//! Purpose: A pooled TCP transport with one staging buffer per direction,
//! plus the `ManageConnection` implementation that opens it.
//!
//! ## Design Principles
//! 1. **Staged Frames**: Outgoing frames are encoded into the outbound buffer
//!    and committed only when the encoder succeeds; a failed encoder leaves
//!    no partial frame behind.
//! 2. **Buffer Reuse**: Both buffers draw from a segment pool shared by every
//!    connection of one connector.
//! 3. **Sticky Failure**: Any transport error marks the connection broken, so
//!    the pool closes it instead of handing it to the next caller.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use tokio::net::TcpStream;
use tracing::debug;

use chw_buffer::{SegmentPool, StagingBuffer};

use crate::client::{ClientConfig, ClientError, ClientResult, SessionSettings};
use crate::pool::ManageConnection;

/// Single TCP connection with staged inbound and outbound bytes.
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    inbound: StagingBuffer,
    outbound: StagingBuffer,
    settings: Arc<SessionSettings>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    broken: bool,
}

impl TcpConnection {
    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Session settings this connection was opened with.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns true after a transport failure or an explicit `mark_broken`.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Flags the connection so the pool closes it on return.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Received, committed bytes waiting to be decoded.
    pub fn inbound(&mut self) -> &mut StagingBuffer {
        &mut self.inbound
    }

    /// Staged outgoing bytes.
    pub fn outbound(&mut self) -> &mut StagingBuffer {
        &mut self.outbound
    }

    /// Encodes one frame into the outbound buffer.
    ///
    /// The frame is committed when `encode` succeeds and rolled back when it
    /// fails, so a reader never sees half a frame.
    pub fn write_frame<F>(&mut self, encode: F) -> ClientResult<()>
    where
        F: FnOnce(&mut StagingBuffer) -> ClientResult<()>,
    {
        match encode(&mut self.outbound) {
            Ok(()) => {
                self.outbound.flush();
                Ok(())
            }
            Err(err) => {
                self.outbound.discard();
                Err(err)
            }
        }
    }

    /// Sends every committed outbound byte.
    pub async fn send(&mut self) -> ClientResult<usize> {
        let result = with_timeout(
            self.write_timeout,
            self.outbound.write_to(&mut self.stream),
        )
        .await;
        self.track(result)
    }

    /// Performs one socket read into the inbound buffer.
    ///
    /// # Errors
    /// Returns `ClientError::ConnectionClosed` when the peer has closed the
    /// stream.
    pub async fn receive(&mut self) -> ClientResult<usize> {
        let result = with_timeout(
            self.read_timeout,
            self.inbound.fill_from(&mut self.stream, 0),
        )
        .await;
        match self.track(result)? {
            0 => {
                self.broken = true;
                debug!(peer = %self.peer, "connection.eof");
                Err(ClientError::ConnectionClosed)
            }
            received => Ok(received),
        }
    }

    /// Receives until `len` bytes are available and takes them.
    pub async fn read_exact(&mut self, len: usize) -> ClientResult<Bytes> {
        while self.inbound.readable_len() < len {
            self.receive().await?;
        }
        Ok(self.inbound.copy_to_bytes(len))
    }

    fn track(&mut self, result: io::Result<usize>) -> ClientResult<usize> {
        result.map_err(|err| {
            self.broken = true;
            debug!(peer = %self.peer, error = %err, "connection.failed");
            ClientError::Io(err)
        })
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .field("broken", &self.broken)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "transport operation timed out",
            )),
        },
        None => fut.await,
    }
}

/// Opens `TcpConnection`s for a `ConnectionPool`.
#[derive(Debug)]
pub struct TcpConnector {
    addr: SocketAddr,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    nodelay: bool,
    segments: SegmentPool,
    settings: Arc<SessionSettings>,
}

impl TcpConnector {
    /// Builds a connector from a configuration.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let addr = config.socket_addr()?;
        let settings = Arc::new(config.session_settings()?);
        Ok(TcpConnector {
            addr,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            nodelay: config.nodelay,
            segments: SegmentPool::new(config.segment_size, config.max_cached_segments),
            settings,
        })
    }

    /// Target address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Validated session settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Segment pool shared by every connection's buffers.
    pub fn segment_pool(&self) -> &SegmentPool {
        &self.segments
    }
}

impl ManageConnection for TcpConnector {
    type Connection = TcpConnection;

    fn connect(&self) -> impl Future<Output = ClientResult<TcpConnection>> + Send {
        let addr = self.addr;
        let connect_timeout = self.connect_timeout;
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;
        let nodelay = self.nodelay;
        let segments = self.segments.clone();
        let settings = Arc::clone(&self.settings);

        async move {
            let stream = match connect_timeout {
                Some(limit) => tokio::time::timeout(limit, TcpStream::connect(addr))
                    .await
                    .map_err(|_| ClientError::ConnectTimeout(limit))??,
                None => TcpStream::connect(addr).await?,
            };
            // Disable Nagle to keep request latency low for small frames.
            stream.set_nodelay(nodelay)?;
            debug!(peer = %addr, "connection.open");

            Ok::<_, ClientError>(TcpConnection {
                stream,
                peer: addr,
                inbound: StagingBuffer::with_pool(segments.clone()),
                outbound: StagingBuffer::with_pool(segments),
                settings,
                read_timeout,
                write_timeout,
                broken: false,
            })
        }
    }

    fn has_broken(&self, conn: &mut TcpConnection) -> bool {
        conn.is_broken()
    }

    fn close(&self, conn: TcpConnection) {
        debug!(peer = %conn.peer, "connection.close");
        drop(conn);
    }
}
