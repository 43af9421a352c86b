//! All protocol message types exchanged between peers.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Application-level media clock.
///
/// Peers are expected to send non-decreasing timestamps on a given stream, but the
/// protocol itself never checks it. Ordering only comes from the in-order delivery of
/// the underlying byte stream.
pub type Timestamp = u64;

/// The wire discriminant of a [`Tape`], sent as its first byte.
///
/// The discriminant space is closed: bytes outside of `0..=8` are rejected when
/// decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TapeType {
    Audio = 0,
    Video = 1,
    SuspendAudio = 2,
    SuspendVideo = 3,
    TakeSpotlight = 4,
    ReleaseSpotlight = 5,
    Play = 6,
    Pause = 7,
    Unpause = 8,
}

impl TapeType {
    /// Every tape type, in tag order.
    pub const ALL: [TapeType; 9] = [
        TapeType::Audio,
        TapeType::Video,
        TapeType::SuspendAudio,
        TapeType::SuspendVideo,
        TapeType::TakeSpotlight,
        TapeType::ReleaseSpotlight,
        TapeType::Play,
        TapeType::Pause,
        TapeType::Unpause,
    ];

    /// Returns the tape type with the given tag, if any.
    #[inline(always)]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        use TapeType::*;
        Some(match tag {
            0 => Audio,
            1 => Video,
            2 => SuspendAudio,
            3 => SuspendVideo,
            4 => TakeSpotlight,
            5 => ReleaseSpotlight,
            6 => Play,
            7 => Pause,
            8 => Unpause,
            _ => return None,
        })
    }

    /// Returns the tag byte sent on the wire.
    #[inline(always)]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Returns whether messages of this type carry anything after their tag byte.
    #[inline(always)]
    pub const fn has_body(self) -> bool {
        use TapeType::*;
        matches!(self, Audio | Video | Play)
    }

    /// Returns a human-readable name, as used in logs.
    pub const fn name(self) -> &'static str {
        use TapeType::*;
        match self {
            Audio => "audio",
            Video => "video",
            SuspendAudio => "suspend audio",
            SuspendVideo => "suspend video",
            TakeSpotlight => "take spotlight",
            ReleaseSpotlight => "release spotlight",
            Play => "play",
            Pause => "pause",
            Unpause => "unpause",
        }
    }
}

impl TryFrom<u8> for TapeType {
    type Error = crate::DecodeError;

    #[inline(always)]
    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(crate::DecodeError::UnknownTag(tag))
    }
}

impl From<TapeType> for u8 {
    #[inline(always)]
    fn from(t: TapeType) -> Self {
        t.tag()
    }
}

impl fmt::Display for TapeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single protocol message.
///
/// Tapes are plain owned values: once built, they are never mutated by this crate or
/// by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tape {
    /// One chunk of audio at a point in time.
    ///
    /// `payload` may have any length, including zero.
    Audio {
        timestamp: Timestamp,
        payload: Vec<u8>,
    },
    /// One video frame at a point in time.
    Video {
        timestamp: Timestamp,
        payload: Vec<u8>,
    },
    /// Pause audio delivery.
    SuspendAudio,
    /// Pause video delivery.
    SuspendVideo,
    /// Claim exclusive presentation focus.
    TakeSpotlight,
    /// Relinquish presentation focus.
    ReleaseSpotlight,
    /// Request playback of a remote resource.
    Play(url::Url),
    /// Pause overall playback.
    Pause,
    /// Resume overall playback.
    Unpause,
}

impl Tape {
    /// Builds a [`Tape::Audio`] from anything convertible into a byte vector.
    #[inline(always)]
    pub fn audio(timestamp: Timestamp, payload: impl Into<Vec<u8>>) -> Self {
        Self::Audio {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Builds a [`Tape::Video`], see [`audio`](Self::audio).
    #[inline(always)]
    pub fn video(timestamp: Timestamp, payload: impl Into<Vec<u8>>) -> Self {
        Self::Video {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Parses `url` and wraps it in a [`Tape::Play`].
    #[inline]
    pub fn play(url: &str) -> Result<Self, crate::DecodeError> {
        crate::codec::parse_url(url.as_bytes()).map(Self::Play)
    }

    /// Returns the body-less tape of the given type.
    ///
    /// Returns `None` for types carrying a body, see [`TapeType::has_body`].
    #[inline]
    pub const fn unit(tape_type: TapeType) -> Option<Self> {
        Some(match tape_type {
            TapeType::SuspendAudio => Self::SuspendAudio,
            TapeType::SuspendVideo => Self::SuspendVideo,
            TapeType::TakeSpotlight => Self::TakeSpotlight,
            TapeType::ReleaseSpotlight => Self::ReleaseSpotlight,
            TapeType::Pause => Self::Pause,
            TapeType::Unpause => Self::Unpause,
            TapeType::Audio | TapeType::Video | TapeType::Play => return None,
        })
    }

    /// Returns this tape's wire discriminant.
    #[inline(always)]
    pub const fn tape_type(&self) -> TapeType {
        match self {
            Self::Audio { .. } => TapeType::Audio,
            Self::Video { .. } => TapeType::Video,
            Self::SuspendAudio => TapeType::SuspendAudio,
            Self::SuspendVideo => TapeType::SuspendVideo,
            Self::TakeSpotlight => TapeType::TakeSpotlight,
            Self::ReleaseSpotlight => TapeType::ReleaseSpotlight,
            Self::Play(_) => TapeType::Play,
            Self::Pause => TapeType::Pause,
            Self::Unpause => TapeType::Unpause,
        }
    }

    /// Returns the timestamp of media tapes.
    #[inline(always)]
    pub const fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Audio { timestamp, .. } | Self::Video { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }

    /// Returns the raw media bytes of media tapes.
    #[inline(always)]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Audio { payload, .. } | Self::Video { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
