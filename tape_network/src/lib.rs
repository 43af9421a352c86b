//! Transport harness for the message model defined in the `tape_proto` crate.
//!
//! This crate turns reliable byte streams into sequences of decoded [`Tape`]s delivered
//! to application callbacks, and provides the means to send tapes back.
//!
//! ## Scope
//!
//! - [`StreamController`]: owns one connection and runs a dedicated worker thread that
//!   decodes one message at a time and hands it to a [`StreamHandler`].
//! - [`StreamServer`]: owns a listener and runs a dedicated worker thread that accepts
//!   connections, creating one controller per connection.
//! - [`Connection`] and [`Listener`]: the byte stream collaborators, implemented for
//!   TCP (and Unix domain sockets on unix).
//!
//! Message framing and validation live in `tape_proto`. Here, tapes are opaque
//! values: a pause is delivered like any other message, and nothing reacts to it on
//! the application's behalf. Delivery guarantees are exactly those of the byte
//! stream: nothing is acknowledged, resent or throttled.
//!
//! ## Lifecycle
//!
//! A controller's worker runs until the peer closes the stream, sends something that
//! is not a valid message, misses the configured read deadline, or the controller is
//! [shut down](StreamController::shutdown). Whichever happens, the handler's
//! [`on_close`](StreamHandler::on_close) is called exactly once with the
//! [`CloseReason`], and servers drop the controller from their registry.

pub mod config;
pub mod connection;
pub mod controller;
pub mod server;

pub use config::StreamConfig;
pub use connection::{Connection, Listener};
pub use controller::{CloseReason, ControllerId, StreamController, StreamHandler};
pub use server::StreamServer;

pub use tape_proto;
pub use tape_proto::{Tape, TapeType};

/// Locks `mutex`, ignoring poisoning.
///
/// A panicking handler never leaves the data we guard (connection handles, the
/// controller registry) in an inconsistent state.
#[inline(always)]
pub(crate) fn lock<T: ?Sized>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Returns `true` if the given I/O error kind represents a timeout condition.
///
/// This treats both `WouldBlock` and `TimedOut` as timeout-equivalent: depending on
/// the platform, a blocking socket read with a timeout reports either.
#[inline(always)]
pub(crate) fn io_err_is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&e)
}
