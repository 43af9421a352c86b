//! Decoding errors.

/// Error returned when bytes cannot be decoded into a [`Tape`](crate::Tape).
///
/// [`Truncated`](Self::Truncated) means the input ended early and the message may
/// still complete if more bytes arrive. Every other variant is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes were available than a field requires.
    #[error("truncated message: field needs {needed} bytes, only {available} available")]
    Truncated { needed: u64, available: u64 },
    /// The tag byte does not name any tape type.
    #[error("unknown tape tag {0}")]
    UnknownTag(u8),
    /// A play payload is not valid UTF-8.
    #[error("play payload is not valid utf-8")]
    InvalidUtf8,
    /// A play payload contains an ASCII control character at the given offset.
    #[error("play payload contains a control character at byte {0}")]
    UrlControlChar(usize),
    /// A play payload does not parse as an absolute URL.
    #[error("play payload is not a valid url: {0}")]
    InvalidUrl(url::ParseError),
    /// A declared length does not fit in memory on this platform.
    #[error("declared length {0} does not fit in memory")]
    LengthOverflow(u64),
    /// A declared length exceeds the limit configured by the receiver.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: u64 },
    /// Bytes were left over after a complete message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

impl DecodeError {
    /// Returns `true` if more input could still turn this failure into a message.
    #[inline(always)]
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Error returned by [`read_tape`](crate::read_tape).
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The stream ended cleanly, before the first byte of a message.
    #[error("stream closed")]
    Closed,
    /// The stream carried bytes that are not a valid message, or ended inside one.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The underlying reader failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
