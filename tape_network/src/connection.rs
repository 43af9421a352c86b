//! Byte stream collaborators.
//!
//! Controllers and servers are written against these traits rather than concrete
//! socket types. Reading exactly `n` bytes and writing all bytes come from
//! [`std::io::Read`] and [`std::io::Write`].

use core::{net::SocketAddr, time::Duration};
use std::io;

/// A reliable, ordered, bidirectional byte stream.
///
/// A controller reads from one handle on its worker thread while other threads write
/// through a second handle, so implementors must be able to hand out independent
/// handles to the same stream.
pub trait Connection: io::Read + io::Write + Send + 'static {
    /// Returns a new handle to the same underlying stream.
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>>;

    /// Shuts down both halves of the stream.
    ///
    /// Readers blocked on any handle to this stream must be woken up, observing
    /// end-of-stream or an error.
    fn shutdown(&self) -> io::Result<()>;

    /// The remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Bounds how long a read may block. `None` blocks indefinitely.
    ///
    /// A read that times out must fail with [`io::ErrorKind::WouldBlock`] or
    /// [`io::ErrorKind::TimedOut`].
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bounds how long a write may block. `None` blocks indefinitely.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Disables write coalescing, where the transport supports it.
    fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for std::net::TcpStream {
    #[inline]
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(self.try_clone()?))
    }

    #[inline]
    fn shutdown(&self) -> io::Result<()> {
        std::net::TcpStream::shutdown(self, std::net::Shutdown::Both)
    }

    #[inline]
    fn peer_addr(&self) -> Option<SocketAddr> {
        std::net::TcpStream::peer_addr(self).ok()
    }

    #[inline]
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_read_timeout(self, timeout)
    }

    #[inline]
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_write_timeout(self, timeout)
    }

    #[inline]
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        std::net::TcpStream::set_nodelay(self, nodelay)
    }
}

#[cfg(unix)]
impl Connection for std::os::unix::net::UnixStream {
    #[inline]
    fn try_clone_connection(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(self.try_clone()?))
    }

    #[inline]
    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, std::net::Shutdown::Both)
    }

    #[inline]
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    #[inline]
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }
}

/// A source of incoming [`Connection`]s.
///
/// Servers put their listener in non-blocking mode and poll it, so that they can
/// notice shutdown requests. Connections returned by [`accept`](Self::accept) must be
/// in blocking mode regardless.
pub trait Listener: Send + 'static {
    /// The kind of stream this listener produces.
    type Connection: Connection;

    /// Accepts one pending connection.
    ///
    /// In non-blocking mode, returns an error of kind [`io::ErrorKind::WouldBlock`]
    /// when none is pending.
    fn accept(&self) -> io::Result<Self::Connection>;

    /// The address connections are accepted on.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Switches [`accept`](Self::accept) between blocking and non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
}

impl Listener for std::net::TcpListener {
    type Connection = std::net::TcpStream;

    #[inline]
    fn accept(&self) -> io::Result<Self::Connection> {
        let (stream, _addr) = std::net::TcpListener::accept(self)?;
        // some platforms have accepted sockets inherit the listener's flags
        stream.set_nonblocking(false)?;
        Ok(stream)
    }

    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpListener::local_addr(self)
    }

    #[inline]
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        std::net::TcpListener::set_nonblocking(self, nonblocking)
    }
}
