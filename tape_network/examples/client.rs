//! Sends a few tapes to a server, and prints what comes back.
//!
//! `RUST_LOG=info cargo run --example client -- 127.0.0.1:6910`

use std::time::Duration;
use tape_network::{StreamConfig, StreamController, Tape};

fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6910".into());

    let config = StreamConfig::default().with_connect_timeout(Some(Duration::from_secs(3)));

    let client = StreamController::connect(
        addr,
        &config,
        |_: &StreamController, tape: Tape| println!("received {tape:?}"),
    )?;

    client.send(&Tape::TakeSpotlight)?;

    for timestamp in 0..4 {
        client.send(&Tape::audio(timestamp, vec![0; 480]))?;
    }

    if let Ok(play) = Tape::play("https://media.example.org/intro.mp4") {
        client.send(&play)?;
    }

    client.send(&Tape::Unpause)?;
    client.send(&Tape::ReleaseSpotlight)?;

    std::thread::sleep(Duration::from_millis(500));

    client.shutdown();
    println!("closed: {:?}", client.join());

    Ok(())
}
