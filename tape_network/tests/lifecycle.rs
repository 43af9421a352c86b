mod common;

use common::*;
use std::{
    collections::VecDeque,
    io::{self, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Mutex,
    time::Duration,
};
use tape_network::{
    CloseReason, Listener, StreamConfig, StreamController, StreamServer, Tape, TapeType,
    tape_proto::DecodeError,
};

/// A TCP listener whose first `accept` calls fail with queued errors.
struct Flaky {
    listener: TcpListener,
    failures: Mutex<VecDeque<io::Error>>,
}

impl Flaky {
    fn bind(failures: impl IntoIterator<Item = io::Error>) -> Self {
        Self {
            listener: TcpListener::bind(("127.0.0.1", 0)).unwrap(),
            failures: Mutex::new(failures.into_iter().collect()),
        }
    }
}

impl Listener for Flaky {
    type Connection = TcpStream;

    fn accept(&self) -> io::Result<TcpStream> {
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Listener::accept(&self.listener)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }
}

fn raw_client(server: &StreamServer) -> TcpStream {
    TcpStream::connect(server.local_addr().unwrap()).unwrap()
}

#[test]
fn close_after_tag_byte_drops_the_partial_message() {
    init_logging();

    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();

    let mut peer = raw_client(&server);
    peer.write_all(&[TapeType::Audio.tag()]).unwrap();
    drop(peer);

    match next(&events) {
        Event::Closed(Closed::Protocol(e)) => assert!(e.is_truncated(), "{e:?}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_quiet(&events);

    // the server keeps serving
    let mut peer = raw_client(&server);
    peer.write_all(&Tape::Pause.encode()).unwrap();
    assert_eq!(next(&events), Event::Tape(Tape::Pause));

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn unknown_tag_closes_the_connection() {
    init_logging();

    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();

    let mut peer = raw_client(&server);
    peer.write_all(&Tape::TakeSpotlight.encode()).unwrap();
    peer.write_all(&[9]).unwrap();
    peer.write_all(&Tape::ReleaseSpotlight.encode()).unwrap();

    assert_eq!(next(&events), Event::Tape(Tape::TakeSpotlight));
    assert_eq!(
        next(&events),
        Event::Closed(Closed::Protocol(DecodeError::UnknownTag(9)))
    );
    assert_quiet(&events);

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn invalid_play_url_closes_the_connection() {
    init_logging();

    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();

    let mut peer = raw_client(&server);
    let mut bytes = vec![TapeType::Play.tag()];
    bytes.extend(0u64.to_be_bytes());
    peer.write_all(&bytes).unwrap();

    assert!(matches!(
        next(&events),
        Event::Closed(Closed::Protocol(DecodeError::InvalidUrl(_)))
    ));

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn registry_forgets_closed_controllers() {
    init_logging();

    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();
    assert!(server.is_empty());

    let clients: Vec<_> = (0..3)
        .map(|_| {
            let client = StreamController::connect(
                server.local_addr().unwrap(),
                &StreamConfig::default(),
                |_: &StreamController, _: Tape| {},
            )
            .unwrap();
            client.send(&Tape::Unpause).unwrap();
            client
        })
        .collect();

    for _ in &clients {
        assert_eq!(next(&events), Event::Tape(Tape::Unpause));
    }
    // controllers are registered before they receive anything
    assert_eq!(server.len(), 3);

    for client in &clients {
        client.shutdown();
        assert_eq!(next(&events), Event::Closed(Closed::EndOfStream));
    }
    // and unregistered before the application hears about the close
    assert!(server.is_empty());

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn server_shutdown_closes_every_connection() {
    init_logging();

    let (recorder, server_events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();

    let (client_recorder, client_events) = Recorder::new();
    let client = StreamController::connect(
        server.local_addr().unwrap(),
        &StreamConfig::default(),
        client_recorder,
    )
    .unwrap();

    client.send(&Tape::TakeSpotlight).unwrap();
    assert_eq!(next(&server_events), Event::Tape(Tape::TakeSpotlight));

    let controllers = server.controllers();
    assert_eq!(controllers.len(), 1);
    assert!(controllers[0].peer_addr().is_some());

    server.shutdown();
    server.join().unwrap();

    assert_eq!(next(&server_events), Event::Closed(Closed::Shutdown));
    assert_eq!(next(&client_events), Event::Closed(Closed::EndOfStream));
    assert!(matches!(controllers[0].join(), Some(CloseReason::Shutdown)));
    assert!(matches!(client.join(), Some(CloseReason::EndOfStream)));
    assert!(server.is_empty());

    // nobody is listening anymore
    assert!(TcpStream::connect(server.local_addr().unwrap()).is_err());
}

#[test]
fn idle_connections_time_out() {
    init_logging();

    let config = StreamConfig::default().with_read_timeout(Some(Duration::from_millis(100)));
    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &config, recorder).unwrap();

    let _peer = raw_client(&server);

    assert_eq!(next(&events), Event::Closed(Closed::TimedOut));
    assert!(server.is_empty());

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn oversized_payloads_are_refused() {
    init_logging();

    let config = StreamConfig::default().with_max_payload_len(Some(1024));
    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &config, recorder).unwrap();

    let mut peer = raw_client(&server);
    peer.write_all(&Tape::audio(0, [0; 1024]).encode()).unwrap();
    peer.write_all(&Tape::audio(1, [0; 1025]).encode()).unwrap();

    assert_eq!(next(&events), Event::Tape(Tape::audio(0, [0; 1024])));
    assert_eq!(
        next(&events),
        Event::Closed(Closed::Protocol(DecodeError::PayloadTooLarge {
            len: 1025,
            max: 1024
        }))
    );

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn connecting_to_nobody_fails() {
    init_logging();

    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap()
    };

    let res = StreamController::connect(
        addr,
        &StreamConfig::default().with_connect_timeout(Some(Duration::from_secs(1))),
        |_: &StreamController, _: Tape| {},
    );
    assert!(res.is_err());
}

#[test]
fn binding_a_taken_port_fails() {
    init_logging();

    let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();

    let res = StreamServer::bind(
        taken.local_addr().unwrap(),
        &StreamConfig::default(),
        |_: &StreamController, _: Tape| {},
    );
    assert!(res.is_err());
}

#[test]
fn send_fails_once_closed() {
    init_logging();

    let (recorder, events) = Recorder::new();
    let server = StreamServer::bind(("127.0.0.1", 0), &StreamConfig::default(), recorder).unwrap();

    let client = StreamController::connect(
        server.local_addr().unwrap(),
        &StreamConfig::default(),
        |_: &StreamController, _: Tape| {},
    )
    .unwrap();

    client.shutdown();
    assert!(client.join().is_some());
    assert!(client.is_closed());
    assert!(client.send(&Tape::Pause).is_err());

    assert_eq!(next(&events), Event::Closed(Closed::EndOfStream));

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn handlers_see_the_registered_controller() {
    init_logging();

    let (tx, seen) = std::sync::mpsc::channel();
    let server = StreamServer::bind(
        ("127.0.0.1", 0),
        &StreamConfig::default(),
        move |controller: &StreamController, _: Tape| {
            let _ = tx.send(controller.clone());
        },
    )
    .unwrap();

    let client = StreamController::connect(
        server.local_addr().unwrap(),
        &StreamConfig::default(),
        |_: &StreamController, _: Tape| {},
    )
    .unwrap();

    client.send(&Tape::Pause).unwrap();
    client.send(&Tape::Unpause).unwrap();

    let first = seen.recv_timeout(TIMEOUT).unwrap();
    let second = seen.recv_timeout(TIMEOUT).unwrap();

    assert_eq!(first, second);
    assert_eq!(server.controllers(), [first.clone()]);
    assert_ne!(first, client);

    client.shutdown();
    wait_until(|| server.is_empty());
    assert!(first.is_closed());

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn server_survives_resource_exhaustion() {
    init_logging();

    let failures = [
        io::Error::from(io::ErrorKind::ConnectionAborted),
        // EMFILE, ENFILE
        io::Error::from_raw_os_error(24),
        io::Error::from_raw_os_error(23),
        io::Error::from(io::ErrorKind::OutOfMemory),
        io::Error::from(io::ErrorKind::Interrupted),
    ];

    let (recorder, events) = Recorder::new();
    let server = StreamServer::spawn(Flaky::bind(failures), &StreamConfig::default(), recorder)
        .unwrap();

    let mut peer = raw_client(&server);
    peer.write_all(&Tape::Unpause.encode()).unwrap();

    assert_eq!(next(&events), Event::Tape(Tape::Unpause));
    assert_eq!(server.len(), 1);

    drop(peer);
    assert_eq!(next(&events), Event::Closed(Closed::EndOfStream));

    // and keeps accepting after that
    let mut peer = raw_client(&server);
    peer.write_all(&Tape::Pause.encode()).unwrap();
    assert_eq!(next(&events), Event::Tape(Tape::Pause));

    server.shutdown();
    server.join().unwrap();
}

#[test]
fn unusable_listener_stops_the_server() {
    init_logging();

    let server = StreamServer::spawn(
        Flaky::bind([io::Error::from(io::ErrorKind::InvalidInput)]),
        &StreamConfig::default(),
        |_: &StreamController, _: Tape| {},
    )
    .unwrap();

    let err = server.join().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}
