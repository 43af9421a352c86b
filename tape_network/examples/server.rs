//! Answers every `unpause` with a `pause`, and logs everything else.
//!
//! `RUST_LOG=info cargo run --example server -- 127.0.0.1:6910`

use tape_network::{StreamConfig, StreamController, StreamServer, Tape};

fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:6910".into());

    let server = StreamServer::bind(
        addr,
        &StreamConfig::default(),
        |controller: &StreamController, tape: Tape| {
            log::info!("{}: {:?}", controller.id(), tape.tape_type());

            if tape == Tape::Unpause {
                let _ = controller.send(&Tape::Pause);
            }
        },
    )?;

    server.join()
}
