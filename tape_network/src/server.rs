//! Accepting connections, one controller per connection.
//!
//! A [`StreamServer`] owns a listener and a single worker thread accepting connections
//! from it. Every accepted connection is handed to a new
//! [`StreamController`](crate::StreamController) sharing the server's handler.
//!
//! The server keeps track of its live controllers. Controllers are dropped from that
//! registry as soon as their receive loop stops, so long-running servers don't
//! accumulate dead connections.

use crate::{
    CloseReason, ControllerId, Listener, StreamConfig, StreamController, StreamHandler, lock,
};
use core::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};
use std::{
    io,
    net::{TcpListener, ToSocketAddrs},
    sync::{Arc, Mutex, Weak},
    thread,
};
use tape_proto::Tape;

/// Live controllers, keyed by identity.
type ControllerMap = rustc_hash::FxHashMap<ControllerId, StreamController>;

struct Inner {
    local_addr: Option<SocketAddr>,
    controllers: Mutex<ControllerMap>,
    shutting_down: AtomicBool,
}

impl Inner {
    fn shutdown_controllers(&self) {
        // don't hold the lock while controllers call back into the registry
        let controllers: Vec<_> = lock(&self.controllers).values().cloned().collect();

        for controller in controllers {
            controller.shutdown();
        }
    }
}

/// Forwards to the application's handler, keeping the registry up to date.
struct Registered {
    server: Weak<Inner>,
    handler: Arc<dyn StreamHandler>,
}

impl StreamHandler for Registered {
    #[inline(always)]
    fn on_tape(&self, controller: &StreamController, tape: Tape) {
        self.handler.on_tape(controller, tape)
    }

    fn on_close(&self, controller: &StreamController, reason: &CloseReason) {
        if let Some(server) = self.server.upgrade() {
            lock(&server.controllers).remove(&controller.id());
        }

        self.handler.on_close(controller, reason)
    }
}

/// Accepts connections on a dedicated worker thread.
///
/// Dropping the server does not stop it, call [`shutdown`](Self::shutdown).
pub struct StreamServer {
    inner: Arc<Inner>,
    worker: Mutex<Option<thread::JoinHandle<io::Result<()>>>>,
}

impl StreamServer {
    /// Binds a TCP listener to `addr`, and starts accepting connections on it.
    pub fn bind(
        addr: impl ToSocketAddrs,
        config: &StreamConfig,
        handler: impl StreamHandler,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        log::info!("listening on {}", listener.local_addr()?);

        Self::spawn(listener, config, handler)
    }

    /// Starts accepting connections from `listener`.
    ///
    /// Returns immediately. Every accepted connection gets its own
    /// [`StreamController`], configured with `config`, and delivering to `handler`.
    pub fn spawn<L: Listener>(
        listener: L,
        config: &StreamConfig,
        handler: impl StreamHandler,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;

        let inner = Arc::new(Inner {
            local_addr: listener.local_addr().ok(),
            controllers: Mutex::new(ControllerMap::default()),
            shutting_down: AtomicBool::new(false),
        });

        let handler: Arc<dyn StreamHandler> = Arc::new(Registered {
            server: Arc::downgrade(&inner),
            handler: Arc::new(handler),
        });

        let server = inner.clone();
        let config = config.clone();

        let handle = thread::Builder::new()
            .name("tape-server".into())
            .spawn(move || accept_loop(&server, &listener, &config, &handler))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Returns the address the listener is bound to.
    #[inline(always)]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Returns a snapshot of the live controllers.
    pub fn controllers(&self) -> Vec<StreamController> {
        lock(&self.inner.controllers).values().cloned().collect()
    }

    /// Returns the number of live controllers.
    #[inline]
    pub fn len(&self) -> usize {
        lock(&self.inner.controllers).len()
    }

    /// Returns `true` if no controller is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting connections, and shuts down every live controller.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        log::info!("server {:?}: shutting down", self.local_addr());

        self.inner.shutdown_controllers();
    }

    /// Waits for the accept loop to stop.
    ///
    /// Failing to accept only stops the loop when the listener itself is unusable.
    /// Running out of resources (file descriptors, most commonly) makes the loop back
    /// off for one poll interval and try again. Returns the error that stopped it, if
    /// any. Returns `Ok(())` immediately if the
    /// loop was already joined.
    pub fn join(&self) -> io::Result<()> {
        let Some(handle) = lock(&self.worker).take() else {
            return Ok(());
        };

        handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("accept loop panicked")))
    }
}

impl core::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamServer")
            .field("local_addr", &self.local_addr())
            .field("controllers", &self.len())
            .finish()
    }
}

/// What the accept loop does after a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Nothing pending, or a pending connection went away: try again right away.
    Retry,
    /// The process or system is short on resources (file descriptors, buffers,
    /// memory): wait one poll interval, then try again.
    Backoff,
    /// The listener itself is unusable.
    Fatal,
}

impl AcceptFailure {
    fn classify(e: &io::Error) -> Self {
        use io::ErrorKind::*;
        match e.kind() {
            Interrupted | ConnectionAborted | ConnectionReset => Self::Retry,
            InvalidInput | Unsupported | NotConnected => Self::Fatal,
            _ => Self::Backoff,
        }
    }
}

fn accept_loop<L: Listener>(
    server: &Inner,
    listener: &L,
    config: &StreamConfig,
    handler: &Arc<dyn StreamHandler>,
) -> io::Result<()> {
    // consecutive backoffs, so that a starved listener logs once per episode
    let mut backoffs = 0u64;

    let res = loop {
        if server.shutting_down.load(Ordering::Acquire) {
            break Ok(());
        }

        let connection = match listener.accept() {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(config.accept_poll_interval);
                continue;
            }
            Err(e) => match AcceptFailure::classify(&e) {
                AcceptFailure::Retry => {
                    log::debug!("accept failed, retrying: {e}");
                    continue;
                }
                AcceptFailure::Backoff => {
                    if backoffs == 0 {
                        log::warn!("accept failed, backing off: {e}");
                    } else {
                        log::debug!("accept still failing ({backoffs}): {e}");
                    }
                    backoffs += 1;
                    thread::sleep(config.accept_poll_interval);
                    continue;
                }
                AcceptFailure::Fatal => {
                    log::error!("accept failed: {e}");
                    break Err(e);
                }
            },
        };

        if backoffs != 0 {
            log::info!("accepting again after {backoffs} failed attempts");
            backoffs = 0;
        }

        let peer_addr = crate::Connection::peer_addr(&connection);
        log::info!("accepted connection from {peer_addr:?}");

        let res = StreamController::spawn_shared(
            Box::new(connection),
            config,
            handler.clone(),
            |controller| {
                lock(&server.controllers).insert(controller.id(), controller.clone());
            },
        );

        if let Err(e) = res {
            log::warn!("dropping connection from {peer_addr:?}: {e}");
        }
    };

    // catches connections accepted while `shutdown` was sweeping the registry
    if server.shutting_down.load(Ordering::Acquire) {
        server.shutdown_controllers();
    }

    res
}
