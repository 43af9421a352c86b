//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::{sync::mpsc, time::Duration};
use tape_network::{CloseReason, StreamController, StreamHandler, Tape, tape_proto::DecodeError};

/// Upper bound on how long any single expected event may take.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How long we wait to be reasonably sure nothing else is coming.
pub const QUIET: Duration = Duration::from_millis(200);

pub fn init_logging() {
    env_logger::try_init().ok();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closed {
    EndOfStream,
    Shutdown,
    TimedOut,
    Protocol(DecodeError),
    Io,
}

impl From<&CloseReason> for Closed {
    fn from(reason: &CloseReason) -> Self {
        match reason {
            CloseReason::EndOfStream => Self::EndOfStream,
            CloseReason::Shutdown => Self::Shutdown,
            CloseReason::TimedOut => Self::TimedOut,
            CloseReason::Protocol(e) => Self::Protocol(e.clone()),
            CloseReason::Io(_) => Self::Io,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Tape(Tape),
    Closed(Closed),
}

/// Forwards every callback to a channel.
pub struct Recorder(pub mpsc::Sender<Event>);

impl Recorder {
    pub fn new() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self(tx), rx)
    }
}

impl StreamHandler for Recorder {
    fn on_tape(&self, _controller: &StreamController, tape: Tape) {
        let _ = self.0.send(Event::Tape(tape));
    }

    fn on_close(&self, _controller: &StreamController, reason: &CloseReason) {
        let _ = self.0.send(Event::Closed(reason.into()));
    }
}

/// Waits for the next event, failing the test if none arrives in time.
pub fn next(events: &mpsc::Receiver<Event>) -> Event {
    events
        .recv_timeout(TIMEOUT)
        .expect("timed out waiting for an event")
}

pub fn assert_quiet(events: &mpsc::Receiver<Event>) {
    if let Ok(e) = events.recv_timeout(QUIET) {
        panic!("unexpected event {e:?}");
    }
}

/// Polls `cond` until it holds, failing the test after [`TIMEOUT`].
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !cond() {
        assert!(start.elapsed() < TIMEOUT, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
