//! Per-connection receive loop and sending.

use crate::{Connection, StreamConfig, lock};
use core::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex},
    thread,
};
use tape_proto::{DecodeError, ReadError, Tape};

/// Opaque identity of a [`StreamController`].
///
/// Freshly generated for every controller, and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControllerId(uuid::Uuid);

impl ControllerId {
    #[inline(always)]
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline(always)]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a controller's receive loop stopped.
#[derive(Debug, thiserror::Error)]
pub enum CloseReason {
    /// The peer closed the stream between two messages.
    #[error("peer closed the stream")]
    EndOfStream,
    /// [`StreamController::shutdown`] was called.
    #[error("shut down locally")]
    Shutdown,
    /// No data arrived within the configured read timeout.
    #[error("read timed out")]
    TimedOut,
    /// The peer sent something that is not a valid message, or closed the stream in
    /// the middle of one.
    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),
    /// Reading from the connection failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl CloseReason {
    /// Returns `true` if the connection ended without anyone misbehaving.
    #[inline(always)]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Shutdown)
    }

    /// Returns the decoding failure that ended the loop, if any.
    #[inline(always)]
    pub const fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

/// Application callbacks invoked by a controller's worker thread.
///
/// Both methods run synchronously on the worker: while they run, no further message
/// is read from that connection.
///
/// Any `Fn(&StreamController, Tape)` closure implements this trait, and ignores
/// close notifications.
pub trait StreamHandler: Send + Sync + 'static {
    /// Called for every fully decoded message, in the order the peer sent them.
    fn on_tape(&self, controller: &StreamController, tape: Tape);

    /// Called exactly once, after the last [`on_tape`](Self::on_tape).
    fn on_close(&self, controller: &StreamController, reason: &CloseReason) {
        let _ = (controller, reason);
    }
}

impl<F> StreamHandler for F
where
    F: Fn(&StreamController, Tape) + Send + Sync + 'static,
{
    #[inline(always)]
    fn on_tape(&self, controller: &StreamController, tape: Tape) {
        self(controller, tape)
    }
}

struct Inner {
    id: ControllerId,
    peer_addr: Option<SocketAddr>,
    /// Handle used by `send`. Locked for a whole message so that concurrent sends
    /// never interleave.
    writer: Mutex<Box<dyn Connection>>,
    /// Handle used to shut the stream down while `writer` may be held.
    control: Mutex<Box<dyn Connection>>,
    shutting_down: AtomicBool,
    closed: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<CloseReason>>>,
}

/// Owns one connection, decoding incoming [`Tape`]s on a dedicated worker thread.
///
/// This is a cheap handle: clones refer to the same controller. Equality and hashing
/// are defined by [`id`](Self::id) only.
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<Inner>,
}

impl StreamController {
    /// Takes ownership of an open connection and starts receiving from it.
    ///
    /// Returns immediately, messages are delivered to `handler` on the controller's
    /// worker thread.
    #[inline]
    pub fn spawn(
        connection: impl Connection,
        config: &StreamConfig,
        handler: impl StreamHandler,
    ) -> io::Result<Self> {
        Self::spawn_shared(Box::new(connection), config, Arc::new(handler), |_| ())
    }

    /// Connects to `addr` over TCP, and starts receiving from the new connection.
    ///
    /// Each resolved address is tried in turn, see
    /// [`StreamConfig::connect_timeout`].
    pub fn connect(
        addr: impl ToSocketAddrs,
        config: &StreamConfig,
        handler: impl StreamHandler,
    ) -> io::Result<Self> {
        let stream = connect_tcp(addr, config)?;

        if let Ok(peer) = stream.peer_addr() {
            log::info!("connected to {peer}");
        }

        Self::spawn(stream, config, handler)
    }

    /// Shared constructor.
    ///
    /// `register` runs before the worker starts, so that it always happens before the
    /// handler's `on_close`. If the worker cannot be started, the handler's `on_close`
    /// is still called.
    ///
    /// `register` must not call [`join`](Self::join) on the new controller.
    pub(crate) fn spawn_shared(
        connection: Box<dyn Connection>,
        config: &StreamConfig,
        handler: Arc<dyn StreamHandler>,
        register: impl FnOnce(&StreamController),
    ) -> io::Result<Self> {
        connection.set_read_timeout(config.read_timeout)?;
        connection.set_write_timeout(config.write_timeout)?;
        if config.nodelay {
            connection.set_nodelay(true)?;
        }

        let controller = Self {
            inner: Arc::new(Inner {
                id: ControllerId::generate(),
                peer_addr: connection.peer_addr(),
                writer: Mutex::new(connection.try_clone_connection()?),
                control: Mutex::new(connection.try_clone_connection()?),
                shutting_down: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        };

        // held until the handle is stored, `join` from other threads waits for it
        let mut worker_slot = lock(&controller.inner.worker);

        register(&controller);

        let worker = controller.clone();
        let max_payload_len = config.max_payload_len;
        let handler_ = handler.clone();

        let res = thread::Builder::new()
            .name(format!("tape-controller-{}", controller.id()))
            .spawn(move || worker.receive_loop(connection, &*handler_, max_payload_len));

        match res {
            Ok(handle) => {
                *worker_slot = Some(handle);
                drop(worker_slot);
                Ok(controller)
            }
            Err(e) => {
                drop(worker_slot);
                controller.inner.closed.store(true, Ordering::Release);
                let reason = CloseReason::Io(io::Error::new(e.kind(), e.to_string()));
                handler.on_close(&controller, &reason);
                Err(e)
            }
        }
    }

    /// Returns this controller's identity.
    #[inline(always)]
    pub fn id(&self) -> ControllerId {
        self.inner.id
    }

    /// Returns the remote address of the connection, if it has one.
    #[inline(always)]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Returns `true` once the receive loop has stopped.
    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Encodes `tape` and writes it to the connection.
    ///
    /// Blocks until the whole message is written, or fails. Failures are also logged.
    /// Nothing is retried.
    pub fn send(&self, tape: &Tape) -> io::Result<()> {
        let bytes = tape.encode();

        let res = {
            let mut writer = lock(&self.inner.writer);
            writer.write_all(&bytes).and_then(|()| writer.flush())
        };

        if let Err(e) = &res {
            log::warn!("controller {}: failed to send {} tape: {e}", self.id(), tape.tape_type());
        }

        res
    }

    /// Stops the receive loop, and closes the connection.
    ///
    /// The handler's `on_close` is called with [`CloseReason::Shutdown`], unless the
    /// loop had already stopped. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        log::debug!("controller {}: shutting down", self.id());

        if let Err(e) = lock(&self.inner.control).shutdown() {
            // the peer may well have closed the connection already
            log::debug!("controller {}: {e}", self.id());
        }
    }

    /// Waits for the receive loop to stop, and returns why it did.
    ///
    /// Returns `None` if the loop was already joined, if the handler panicked, or when
    /// called from the controller's own worker thread (from within a handler).
    pub fn join(&self) -> Option<CloseReason> {
        let handle = {
            let mut worker = lock(&self.inner.worker);

            if worker
                .as_ref()
                .is_some_and(|h| h.thread().id() == thread::current().id())
            {
                return None;
            }

            worker.take()?
        };

        handle.join().ok()
    }

    fn receive_loop(
        self,
        mut connection: Box<dyn Connection>,
        handler: &dyn StreamHandler,
        max_payload_len: Option<u64>,
    ) -> CloseReason {
        log::debug!("controller {}: receiving from {:?}", self.id(), self.peer_addr());

        let reason = loop {
            if self.inner.shutting_down.load(Ordering::Acquire) {
                break CloseReason::Shutdown;
            }

            match tape_proto::read_tape(&mut connection, max_payload_len) {
                Ok(tape) => handler.on_tape(&self, tape),
                Err(e) => break self.close_reason(e),
            }
        };

        self.inner.closed.store(true, Ordering::Release);

        // other handles to the stream may outlive this loop, make sure the peer sees it
        if !matches!(reason, CloseReason::Shutdown) {
            let _ = lock(&self.inner.control).shutdown();
        }

        match &reason {
            CloseReason::Protocol(e) => {
                log::warn!("controller {}: closing, peer violated protocol: {e}", self.id())
            }
            r => log::debug!("controller {}: closing, {r}", self.id()),
        }

        handler.on_close(&self, &reason);

        reason
    }

    fn close_reason(&self, e: ReadError) -> CloseReason {
        // reads fail in all sorts of ways after a local shutdown
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return CloseReason::Shutdown;
        }

        match e {
            ReadError::Closed => CloseReason::EndOfStream,
            ReadError::Decode(e) => CloseReason::Protocol(e),
            ReadError::Io(e) if crate::io_err_is_timeout(e.kind()) => CloseReason::TimedOut,
            ReadError::Io(e) => CloseReason::Io(e),
        }
    }
}

impl PartialEq for StreamController {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for StreamController {}

impl core::hash::Hash for StreamController {
    #[inline(always)]
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn connect_tcp(addr: impl ToSocketAddrs, config: &StreamConfig) -> io::Result<TcpStream> {
    let Some(timeout) = config.connect_timeout else {
        return TcpStream::connect(addr);
    };

    let mut last_err = None;

    for addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any address",
        )
    }))
}
