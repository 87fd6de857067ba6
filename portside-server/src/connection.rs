//! Transport-agnostic duplex connection.
//!
//! A [`Connection`] wraps any [`DuplexTransport`] and owns the full
//! lifecycle: one receive loop decoding packages through a pipeline filter,
//! an outbound batch queue with at most one physical write in flight, and a
//! write-once close reason with a single-shot close notification.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use portside_core::error::is_ignorable_io_kind;
use portside_core::{BatchQueue, DuplexTransport, Error, PackageEncoder, PipelineFilter, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionOptions;

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// No specific reason was recorded.
    Unknown = 0,
    /// The server is shutting down.
    ServerShutdown = 1,
    /// The remote endpoint closed the connection.
    RemoteClosing = 2,
    /// The local endpoint closed the connection.
    LocalClosing = 3,
    /// An application handler asked for the close.
    ApplicationError = 4,
    /// A socket-level error terminated the connection.
    SocketError = 5,
    /// The connection idled past its deadline.
    TimedOut = 6,
    /// The peer violated the wire protocol.
    ProtocolError = 7,
    /// An internal error terminated the connection.
    InternalError = 8,
}

impl CloseReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CloseReason::Unknown),
            1 => Some(CloseReason::ServerShutdown),
            2 => Some(CloseReason::RemoteClosing),
            3 => Some(CloseReason::LocalClosing),
            4 => Some(CloseReason::ApplicationError),
            5 => Some(CloseReason::SocketError),
            6 => Some(CloseReason::TimedOut),
            7 => Some(CloseReason::ProtocolError),
            8 => Some(CloseReason::InternalError),
            _ => None,
        }
    }

    fn value(self) -> u8 {
        self as u8
    }
}

// Sentinel for "no close reason recorded yet".
const NO_REASON: u8 = u8::MAX;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed, receive loop not started.
    Created = 0,
    /// Receive loop running.
    Running = 1,
    /// Close initiated, teardown in progress.
    Closing = 2,
    /// Fully closed; the close notification has fired.
    Closed = 3,
    /// The transport was handed back to the caller.
    Detached = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Created,
            1 => ConnectionState::Running,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Detached,
        }
    }
}

struct ConnectionInner {
    state: AtomicU8,
    close_reason: AtomicU8,
    queue: BatchQueue<Bytes>,
    send_in_flight: AtomicBool,
    torn_down: AtomicBool,
    writer: Mutex<Option<WriteHalf<Box<dyn DuplexTransport>>>>,
    closed_tx: watch::Sender<Option<CloseReason>>,
    token: CancellationToken,
    started_at: Instant,
    last_active_ms: AtomicU64,
    send_timeout: Option<Duration>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Records the close reason; only the first caller wins.
    fn set_close_reason(&self, reason: CloseReason) -> bool {
        self.close_reason
            .compare_exchange(
                NO_REASON,
                reason.value(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_u8(self.close_reason.load(Ordering::Acquire))
    }

    fn touch(&self) {
        self.last_active_ms
            .store(self.started_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_time(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.started_at.elapsed().saturating_sub(last)
    }

    fn is_send_allowed(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Created | ConnectionState::Running
        )
    }

    fn enqueue(&self, data: Bytes) -> Result<()> {
        if !self.is_send_allowed() {
            return Err(Error::ConnectionClosed);
        }
        self.touch();
        self.queue.enqueue(data).map_err(|_| Error::SendQueueFull)
    }

    /// Runs the drain loop if no other task is writing.
    ///
    /// Whoever wins the flag writes everything queued, including items other
    /// producers enqueued while losing the race. After releasing the flag
    /// the queue is re-checked so a late enqueue is never stranded.
    async fn drain_if_idle(&self) -> Result<()> {
        loop {
            if self
                .send_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Ok(());
            }
            let result = self.drain().await;
            self.send_in_flight.store(false, Ordering::Release);
            if result.is_err() || self.queue.is_empty() {
                return result;
            }
        }
    }

    async fn drain(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;
        let mut batch = Vec::new();
        while self.queue.try_dequeue(&mut batch) {
            for data in batch.drain(..) {
                if let Err(error) =
                    Self::write_bounded(writer.write_all(&data), self.send_timeout, &self.token)
                        .await
                {
                    self.fail_writes(&error);
                    return Err(error.into());
                }
                #[cfg(feature = "metrics")]
                metrics::counter!("portside_server_bytes_sent_total")
                    .increment(data.len() as u64);
            }
            if let Err(error) =
                Self::write_bounded(writer.flush(), self.send_timeout, &self.token).await
            {
                self.fail_writes(&error);
                return Err(error.into());
            }
            self.touch();
        }
        Ok(())
    }

    /// One bounded write. Gives up when `limit` elapses or `token` fires, so
    /// a peer that stopped reading cannot hold the writer mutex across a
    /// close. Either way the write is abandoned mid-frame; the caller must
    /// fail the connection, nothing may be written after it.
    ///
    /// The select is biased towards the write: a write that can complete on
    /// the spot still goes out even after cancellation, only a parked one is
    /// aborted.
    async fn write_bounded<F>(
        op: F,
        limit: Option<Duration>,
        token: &CancellationToken,
    ) -> std::io::Result<()>
    where
        F: std::future::Future<Output = std::io::Result<()>>,
    {
        let bounded = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, op).await {
                    Ok(result) => result,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "send timed out",
                    )),
                },
                None => op.await,
            }
        };
        tokio::select! {
            biased;
            result = bounded => result,
            _ = token.cancelled() => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closing",
            )),
        }
    }

    fn fail_writes(&self, error: &std::io::Error) {
        let reason = if error.kind() == std::io::ErrorKind::TimedOut {
            CloseReason::TimedOut
        } else {
            CloseReason::SocketError
        };
        if self.set_close_reason(reason) {
            crate::log_warn!("write failed, closing connection: {}", error);
        } else {
            crate::log_debug!("write abandoned while closing: {}", error);
        }
        self.token.cancel();
    }

    async fn take_writer(&self) -> Option<WriteHalf<Box<dyn DuplexTransport>>> {
        self.writer.lock().await.take()
    }

    /// Final teardown: attempt a last drain, shut the write side down and
    /// fire the single-shot close notification. The first caller runs it,
    /// whether that is the receive loop or a close before the loop ever
    /// started; later calls return immediately.
    async fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store_state(ConnectionState::Closing);
        self.token.cancel();
        let _ = self.drain_if_idle().await;
        if let Some(mut writer) = self.take_writer().await {
            let _ = writer.shutdown().await;
        }
        self.store_state(ConnectionState::Closed);
        let reason = self.close_reason();
        let _ = self.closed_tx.send(reason);

        #[cfg(feature = "metrics")]
        metrics::counter!("portside_server_connections_closed_total").increment(1);

        crate::log_debug!("connection closed: {:?}", reason);
    }
}

/// A duplex connection over any [`DuplexTransport`].
///
/// Sends can come from many tasks concurrently; they are queued in a batch
/// queue and flushed by whichever sender wins the in-flight flag, so at most
/// one physical write is ever outstanding. Receiving happens on the single
/// [`PackageStream`] returned by [`run`](Self::run).
pub struct Connection {
    inner: Arc<ConnectionInner>,
    reader: Option<ReadHalf<Box<dyn DuplexTransport>>>,
    options: ConnectionOptions,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("remote_addr", &self.remote_addr())
            .field("close_reason", &self.close_reason())
            .finish()
    }
}

impl Connection {
    /// Wraps a transport. The receive loop does not start until
    /// [`run`](Self::run) is called.
    pub fn new(transport: Box<dyn DuplexTransport>, options: ConnectionOptions) -> Self {
        let remote_addr = transport.remote_addr();
        let local_addr = transport.local_addr();
        let (reader, writer) = tokio::io::split(transport);
        let (closed_tx, _) = watch::channel(None);

        let inner = Arc::new(ConnectionInner {
            state: AtomicU8::new(ConnectionState::Created as u8),
            close_reason: AtomicU8::new(NO_REASON),
            queue: BatchQueue::with_capacity(options.send_queue_size),
            send_in_flight: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            closed_tx,
            token: CancellationToken::new(),
            started_at: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            send_timeout: options.send_timeout,
            remote_addr,
            local_addr,
        });

        #[cfg(feature = "metrics")]
        metrics::counter!("portside_server_connections_opened_total").increment(1);

        Self {
            inner,
            reader: Some(reader),
            options,
        }
    }

    /// Starts the receive loop, consuming the read half of the transport.
    ///
    /// Returns the package stream that decodes inbound bytes through
    /// `filter`. There is exactly one receive loop per connection; calling
    /// `run` twice is an error.
    pub fn run<F>(&mut self, filter: F) -> Result<PackageStream<F::Package>>
    where
        F: PipelineFilter,
    {
        if self.inner.state() != ConnectionState::Created {
            return Err(Error::Other(
                "receive loop already started for this connection".into(),
            ));
        }
        let reader = self.reader.take().ok_or(Error::ConnectionClosed)?;
        self.inner.store_state(ConnectionState::Running);

        Ok(PackageStream {
            reader,
            filter: Box::new(filter),
            buffer: BytesMut::with_capacity(self.options.receive_buffer_size),
            inner: self.inner.clone(),
            options: self.options.clone(),
            ended: false,
        })
    }

    /// Queues `data` and flushes the queue unless another sender already is.
    ///
    /// With [`ConnectionOptions::flush_on_send`] cleared the drain is handed
    /// to a background task instead and this returns once the data is
    /// queued.
    ///
    /// Fails with [`Error::SendQueueFull`] when the batch queue is at
    /// capacity and [`Error::ConnectionClosed`] once the connection is
    /// closing.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.inner.enqueue(data)?;
        if !self.options.flush_on_send {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let _ = inner.drain_if_idle().await;
            });
            return Ok(());
        }
        self.inner.drain_if_idle().await
    }

    /// Encodes `package` and sends the resulting bytes.
    pub async fn send_with<E>(&self, encoder: &E, package: &E::Package) -> Result<()>
    where
        E: PackageEncoder,
    {
        let mut buf = BytesMut::new();
        encoder.encode(&mut buf, package)?;
        self.send(buf.freeze()).await
    }

    /// Non-blocking send: queues `data` and schedules a flush.
    ///
    /// Returns `false` when the queue is full or the connection is closing;
    /// the item is not queued in that case.
    pub fn try_send(&self, data: Bytes) -> bool {
        if self.inner.enqueue(data).is_err() {
            return false;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = inner.drain_if_idle().await;
        });
        true
    }

    /// Closes the connection, recording `reason` if none is recorded yet.
    ///
    /// The first recorded reason wins. When the receive loop is running it
    /// performs the actual teardown and fires the close notification;
    /// otherwise the teardown happens here. That holds even when an earlier
    /// failed send already recorded its own reason: without a loop to wind
    /// down, this close is what tears the connection down.
    pub async fn close(&self, reason: CloseReason) {
        if self.state() == ConnectionState::Detached {
            return;
        }
        let first = self.inner.set_close_reason(reason);
        if self.state() == ConnectionState::Created {
            self.inner.shutdown().await;
        } else if first {
            self.inner.store_state(ConnectionState::Closing);
            self.inner.token.cancel();
        }
    }

    /// Hands the transport back to the caller before the receive loop runs.
    ///
    /// Queued sends that were never flushed are discarded. Use
    /// [`PackageStream::detach`] once the loop has started.
    pub async fn detach(mut self) -> Result<Box<dyn DuplexTransport>> {
        let reader = self.reader.take().ok_or_else(|| {
            Error::Other("read half already taken by the receive loop".into())
        })?;
        let writer = self
            .inner
            .take_writer()
            .await
            .ok_or(Error::ConnectionClosed)?;
        self.inner.store_state(ConnectionState::Detached);
        Ok(reader.unsplit(writer))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// The recorded close reason, if a close has been initiated.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason()
    }

    /// Subscribes to the close notification.
    ///
    /// The receiver observes a change exactly once, when the connection is
    /// fully closed. Detached connections never notify.
    pub fn closed(&self) -> watch::Receiver<Option<CloseReason>> {
        self.inner.closed_tx.subscribe()
    }

    /// Token cancelled when the connection starts closing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Remote address reported by the transport, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Local address reported by the transport, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Time since the last byte was received or queued for send.
    pub fn idle_time(&self) -> Duration {
        self.inner.idle_time()
    }

    /// Number of sends waiting in the outbound queue.
    pub fn pending_sends(&self) -> usize {
        self.inner.queue.len()
    }
}

/// The inbound side of a running connection.
///
/// [`next`](Self::next) returns decoded packages until the connection ends.
/// Errors never cross this boundary: a protocol or socket error closes the
/// connection (with the close reason recorded) and the stream simply ends.
pub struct PackageStream<P> {
    reader: ReadHalf<Box<dyn DuplexTransport>>,
    filter: Box<dyn PipelineFilter<Package = P>>,
    buffer: BytesMut,
    inner: Arc<ConnectionInner>,
    options: ConnectionOptions,
    ended: bool,
}

impl<P> fmt::Debug for PackageStream<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageStream")
            .field("buffered", &self.buffer.len())
            .field("ended", &self.ended)
            .finish()
    }
}

impl<P: Send + 'static> PackageStream<P> {
    /// Returns the next decoded package, or `None` once the connection
    /// ended. After the first `None` the connection is fully closed and the
    /// close notification has fired.
    pub async fn next(&mut self) -> Option<P> {
        if self.ended {
            return None;
        }
        loop {
            match self.filter.filter(&mut self.buffer) {
                Ok(Some(package)) => {
                    self.inner.touch();

                    #[cfg(feature = "metrics")]
                    metrics::counter!("portside_server_packages_received_total").increment(1);

                    // Protocols that upgrade mid-stream switch filters here.
                    if let Some(next) = self.filter.next_filter() {
                        self.filter = next;
                    }
                    return Some(package);
                }
                Ok(None) => {}
                Err(error) => {
                    crate::log_warn!("protocol error, closing connection: {}", error);
                    self.inner.set_close_reason(CloseReason::ProtocolError);
                    return self.finish().await;
                }
            }

            if self.buffer.len() > self.options.max_package_length {
                crate::log_warn!(
                    "buffered package of {} bytes exceeds the maximum of {}",
                    self.buffer.len(),
                    self.options.max_package_length
                );
                self.inner.set_close_reason(CloseReason::ProtocolError);
                return self.finish().await;
            }

            self.buffer.reserve(self.options.receive_buffer_size);
            tokio::select! {
                _ = self.inner.token.cancelled() => {
                    return self.finish().await;
                }
                read = self.reader.read_buf(&mut self.buffer) => match read {
                    Ok(0) => {
                        self.inner.set_close_reason(CloseReason::RemoteClosing);
                        return self.finish().await;
                    }
                    Ok(_n) => {
                        self.inner.touch();

                        #[cfg(feature = "metrics")]
                        metrics::counter!("portside_server_bytes_received_total")
                            .increment(_n as u64);
                    }
                    Err(error) => {
                        if is_ignorable_io_kind(error.kind()) {
                            crate::log_debug!("connection ended by peer: {}", error);
                            self.inner.set_close_reason(CloseReason::RemoteClosing);
                        } else {
                            crate::log_warn!("socket error, closing connection: {}", error);
                            self.inner.set_close_reason(CloseReason::SocketError);
                        }
                        return self.finish().await;
                    }
                }
            }
        }
    }

    /// Adapts the stream to a [`futures_util::Stream`] of packages.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = P> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|package| (package, stream))
        })
    }

    /// Stops the receive loop and hands the transport back to the caller.
    ///
    /// Bytes already buffered but not yet decoded are discarded, as are
    /// queued sends that were never flushed.
    pub async fn detach(mut self) -> Result<Box<dyn DuplexTransport>> {
        self.ended = true;
        let writer = self
            .inner
            .take_writer()
            .await
            .ok_or(Error::ConnectionClosed)?;
        self.inner.store_state(ConnectionState::Detached);
        Ok(self.reader.unsplit(writer))
    }

    async fn finish(&mut self) -> Option<P> {
        self.ended = true;
        self.inner.shutdown().await;
        None
    }
}
