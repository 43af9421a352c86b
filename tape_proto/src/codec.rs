//! Wire encoding and decoding: all byte-level parsing is done here.
//!
//! There are two decoding paths, and both follow the exact same layout:
//!
//! - [`Tape::decode`] works on a buffer holding (at least) one complete message.
//! - [`read_tape`] pulls one message out of a blocking reader, field by field, which is
//!   what connection receive loops use.

use crate::{DecodeError, ReadError, Tape, TapeType, Timestamp};
use std::io::{self, Read};

/// Size of the tag byte.
pub const TAG_LEN: usize = size_of::<u8>();
/// Size of a timestamp field.
pub const TIMESTAMP_LEN: usize = size_of::<Timestamp>();
/// Size of a length prefix.
pub const LENGTH_LEN: usize = size_of::<u64>();

/// Size of the longest fixed-size prefix of any message (audio and video).
pub const MAX_HEADER_LEN: usize = TAG_LEN + TIMESTAMP_LEN + LENGTH_LEN;

type Header = arrayvec::ArrayVec<u8, MAX_HEADER_LEN>;

impl Tape {
    /// Splits this tape into its fixed-size header and its variable-length body.
    #[inline]
    fn split_encoded(&self) -> (Header, &[u8]) {
        let mut header = Header::new_const();
        header.push(self.tape_type().tag());

        let body: &[u8] = match self {
            Self::Audio { timestamp, payload } | Self::Video { timestamp, payload } => {
                header.extend(timestamp.to_be_bytes());
                payload
            }
            Self::Play(url) => url.as_str().as_bytes(),
            _ => return (header, &[][..]),
        };

        header.extend((body.len() as u64).to_be_bytes());

        (header, body)
    }

    /// Returns the number of bytes [`encode`](Self::encode) produces.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        let (header, body) = self.split_encoded();
        header.len() + body.len()
    }

    /// Encodes this tape into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let (header, body) = self.split_encoded();

        let mut bytes = Vec::with_capacity(header.len() + body.len());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(body);
        bytes
    }

    /// Writes the wire representation of this tape into `writer`.
    ///
    /// This issues at most two writes, and doesn't flush.
    pub fn encode_into<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let (header, body) = self.split_encoded();

        writer.write_all(&header)?;
        if !body.is_empty() {
            writer.write_all(body)?;
        }

        Ok(())
    }

    /// Decodes the message at the start of `bytes`.
    ///
    /// On success, returns the message and the bytes following it. Declared payload
    /// lengths are not bounded, see [`decode_with_limit`](Self::decode_with_limit).
    #[inline(always)]
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        Self::decode_with_limit(bytes, None)
    }

    /// Decodes the message at the start of `bytes`, rejecting payloads longer than
    /// `max_payload_len`, if provided.
    pub fn decode_with_limit(
        bytes: &[u8],
        max_payload_len: Option<u64>,
    ) -> Result<(Self, &[u8]), DecodeError> {
        let (&[tag], rem) = split_chunk::<TAG_LEN>(bytes)?;
        let tape_type = TapeType::try_from(tag)?;

        if let Some(tape) = Tape::unit(tape_type) {
            return Ok((tape, rem));
        }

        let (timestamp, rem) = match tape_type {
            TapeType::Audio | TapeType::Video => {
                let (&timestamp, rem) = split_chunk::<TIMESTAMP_LEN>(rem)?;
                (Timestamp::from_be_bytes(timestamp), rem)
            }
            _ => (0, rem),
        };

        let (&len, rem) = split_chunk::<LENGTH_LEN>(rem)?;
        let len = check_len(u64::from_be_bytes(len), max_payload_len)?;

        let available = rem.len() as u64;
        if available < len {
            return Err(DecodeError::Truncated {
                needed: len,
                available,
            });
        }

        let (body, rem) = rem.split_at(to_usize(len)?);

        let tape = match tape_type {
            TapeType::Audio => Self::audio(timestamp, body),
            TapeType::Video => Self::video(timestamp, body),
            _ => Self::Play(parse_url(body)?),
        };

        Ok((tape, rem))
    }

    /// Decodes a buffer holding exactly one message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (tape, rem) = Self::decode(bytes)?;

        if rem.is_empty() {
            Ok(tape)
        } else {
            Err(DecodeError::TrailingBytes(rem.len()))
        }
    }
}

/// Reads exactly one message from `reader`.
///
/// Fields are read one at a time, in wire order, blocking until each is complete.
/// Payloads are buffered incrementally, so a hostile length prefix does not cause a
/// large allocation up front.
///
/// Returns [`ReadError::Closed`] if the reader is at end-of-stream before the tag byte.
/// Reaching end-of-stream anywhere else yields [`DecodeError::Truncated`].
pub fn read_tape<R: io::Read + ?Sized>(
    reader: &mut R,
    max_payload_len: Option<u64>,
) -> Result<Tape, ReadError> {
    let mut tag = [0; TAG_LEN];
    if read_full(reader, &mut tag)? == 0 {
        return Err(ReadError::Closed);
    }

    let tape_type = TapeType::try_from(tag[0])?;

    if let Some(tape) = Tape::unit(tape_type) {
        return Ok(tape);
    }

    let tape = match tape_type {
        TapeType::Audio => {
            let timestamp = Timestamp::from_be_bytes(read_chunk(reader)?);
            Tape::Audio {
                timestamp,
                payload: read_body(reader, max_payload_len)?,
            }
        }
        TapeType::Video => {
            let timestamp = Timestamp::from_be_bytes(read_chunk(reader)?);
            Tape::Video {
                timestamp,
                payload: read_body(reader, max_payload_len)?,
            }
        }
        _ => Tape::Play(parse_url(&read_body(reader, max_payload_len)?)?),
    };

    Ok(tape)
}

/// Parses a play payload.
///
/// The payload must be UTF-8 and free of ASCII control characters (the URL parser would
/// otherwise silently strip or escape some of them), and must be an absolute URL.
pub(crate) fn parse_url(bytes: &[u8]) -> Result<url::Url, DecodeError> {
    let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

    if let Some(i) = s.bytes().position(|b| b.is_ascii_control()) {
        return Err(DecodeError::UrlControlChar(i));
    }

    url::Url::parse(s).map_err(DecodeError::InvalidUrl)
}

#[inline(always)]
fn split_chunk<const N: usize>(bytes: &[u8]) -> Result<(&[u8; N], &[u8]), DecodeError> {
    bytes
        .split_first_chunk::<N>()
        .ok_or(DecodeError::Truncated {
            needed: N as u64,
            available: bytes.len() as u64,
        })
}

#[inline(always)]
fn check_len(len: u64, max_payload_len: Option<u64>) -> Result<u64, DecodeError> {
    match max_payload_len {
        Some(max) if len > max => Err(DecodeError::PayloadTooLarge { len, max }),
        _ => Ok(len),
    }
}

#[inline(always)]
fn to_usize(len: u64) -> Result<usize, DecodeError> {
    usize::try_from(len).map_err(|_| DecodeError::LengthOverflow(len))
}

/// Reads into `buf` until it is full or the reader hits end-of-stream.
///
/// Returns the number of bytes read.
fn read_full<R: io::Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

fn read_chunk<const N: usize, R: io::Read + ?Sized>(reader: &mut R) -> Result<[u8; N], ReadError> {
    let mut chunk = [0; N];
    let n = read_full(reader, &mut chunk)?;

    if n < N {
        return Err(DecodeError::Truncated {
            needed: N as u64,
            available: n as u64,
        }
        .into());
    }

    Ok(chunk)
}

/// Reads a length prefix, then that many bytes.
fn read_body<R: io::Read + ?Sized>(
    reader: &mut R,
    max_payload_len: Option<u64>,
) -> Result<Vec<u8>, ReadError> {
    let len = u64::from_be_bytes(read_chunk::<LENGTH_LEN, _>(reader)?);
    let len = check_len(len, max_payload_len)?;
    // fail early on lengths we could never hold
    to_usize(len)?;

    let mut body = Vec::new();
    (&mut *reader).take(len).read_to_end(&mut body)?;

    let available = body.len() as u64;
    if available < len {
        return Err(DecodeError::Truncated {
            needed: len,
            available,
        }
        .into());
    }

    Ok(body)
}
