//! Byte transport with a queue-depth gauge
//!
//! A dedicated writer task drains an unbounded channel into the socket. The
//! number of bytes accepted but not yet flushed is kept in an atomic gauge;
//! a growing gauge means the socket cannot keep up with the encoder and is
//! the input signal for bitrate adaptation.
//!
//! The transport is generic over the byte stream, so tests (and callers
//! supplying their own TLS or tunneled streams) can hand in anything that is
//! `AsyncRead + AsyncWrite`.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};

enum WriteOp {
    Data(Bytes),
    Shutdown,
}

/// Shared byte counters for a connection
#[derive(Debug, Default)]
struct Counters {
    queued_out: AtomicU64,
    total_out: AtomicU64,
    total_in: AtomicU64,
}

/// Cloneable handle for feeding the writer task
#[derive(Clone)]
pub struct TransportWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
}

impl TransportWriter {
    /// Queue bytes for writing. The queued gauge rises immediately and
    /// falls once the writer task has flushed the bytes.
    pub fn send(&self, data: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.counters
            .queued_out
            .fetch_add(data.len() as u64, Ordering::AcqRel);
        self.tx
            .send(WriteOp::Data(data))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Bytes accepted but not yet flushed
    pub fn queued_bytes(&self) -> u64 {
        self.counters.queued_out.load(Ordering::Acquire)
    }

    /// Total bytes flushed to the peer
    pub fn total_bytes_out(&self) -> u64 {
        self.counters.total_out.load(Ordering::Acquire)
    }

    /// Ask the writer task to shut the stream down. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(WriteOp::Shutdown);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Read side of a connection plus the shared writer handle
pub struct Transport {
    reader: ReadHalf<Box<dyn Stream>>,
    writer: TransportWriter,
    counters: Arc<Counters>,
}

/// Object-safe alias for the underlying byte stream
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

impl Transport {
    /// Wrap an established byte stream, spawning the writer task
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: Box<dyn Stream> = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);

        let counters = Arc::new(Counters::default());
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task_counters = Arc::clone(&counters);
        let task_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut writer = BufWriter::new(write_half);
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Data(data) => {
                        let len = data.len() as u64;
                        let result = async {
                            writer.write_all(&data).await?;
                            writer.flush().await
                        }
                        .await;
                        task_counters.queued_out.fetch_sub(len, Ordering::AcqRel);
                        match result {
                            Ok(()) => {
                                task_counters.total_out.fetch_add(len, Ordering::AcqRel);
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "transport write failed");
                                task_closed.store(true, Ordering::Release);
                                break;
                            }
                        }
                    }
                    WriteOp::Shutdown => {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
        });

        Self {
            reader: read_half,
            writer: TransportWriter {
                tx,
                counters: Arc::clone(&counters),
                closed,
            },
            counters,
        }
    }

    /// Connect a plain TCP transport
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout)??;
        stream.set_nodelay(true)?;
        tracing::debug!(host = host, port = port, "tcp transport connected");
        Ok(Self::new(stream))
    }

    /// Read more bytes into `buf`. Returns the count, or
    /// `Error::ConnectionClosed` on EOF.
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = self.reader.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.counters.total_in.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    /// Cloneable writer handle
    pub fn writer(&self) -> TransportWriter {
        self.writer.clone()
    }

    pub fn send(&self, data: Bytes) -> Result<()> {
        self.writer.send(data)
    }

    pub fn queued_bytes(&self) -> u64 {
        self.writer.queued_bytes()
    }

    pub fn total_bytes_in(&self) -> u64 {
        self.counters.total_in.load(Ordering::Acquire)
    }

    pub fn total_bytes_out(&self) -> u64 {
        self.writer.total_bytes_out()
    }

    pub fn close(&self) {
        self.writer.close()
    }
}
