//! A small binary protocol for coordinating a shared audio/video stream between peers.
//!
//! This crate defines the message model ([`Tape`]) and its wire representation. It
//! performs no networking and spawns no threads: see the `tape_network` crate for the
//! transport harness built on top of it.
//!
//! ## Protocol model
//!
//! Every message is a single [`Tape`]. Messages fall into three broad categories:
//!
//! - **Media messages**: [`Tape::Audio`] and [`Tape::Video`] carry one chunk of raw
//!   media bytes stamped with an application-level clock.
//! - **Presentation control**: [`Tape::TakeSpotlight`] and [`Tape::ReleaseSpotlight`]
//!   claim and relinquish exclusive presentation focus. Spotlight is purely cooperative,
//!   nothing here enforces it beyond delivering the claim.
//! - **Playback control**: [`Tape::Play`], [`Tape::Pause`], [`Tape::Unpause`],
//!   [`Tape::SuspendAudio`] and [`Tape::SuspendVideo`].
//!
//! ## Wire format
//!
//! Messages are framed as tag-length-value. Every multi-byte integer is a **big-endian**
//! `u64`.
//!
//! ```text
//! audio, video:   [tag: 1][timestamp: 8][length: 8][payload: length]
//! play:           [tag: 1][length: 8][utf-8 url: length]
//! anything else:  [tag: 1]
//! ```
//!
//! Tags `0..=8` map, in order, to audio, video, suspend audio, suspend video,
//! take spotlight, release spotlight, play, pause and unpause. Any other tag is a
//! protocol violation.
//!
//! Payload lengths are only bounded by the length field itself. Receivers wishing to
//! protect themselves against hostile peers can opt into a maximum, see
//! [`Tape::decode_with_limit`] and [`read_tape`].
//!
//! The types in this crate also implement `serde`'s `Serialize` and `Deserialize`
//! traits, for the user to conveniently plug into other `serde` backends. That
//! representation is unrelated to the wire format above.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::read_tape;
pub use error::{DecodeError, ReadError};
pub use message::{Tape, TapeType, Timestamp};
pub use url;
