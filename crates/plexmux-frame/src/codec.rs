use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Default maximum payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Largest stream id that still fits beside the 3-bit tag in a `u64` header.
pub const MAX_STREAM_ID: u64 = u64::MAX >> 3;

/// Body carried by every CLOSE frame this codec writes.
const CLOSE_BODY: &[u8] = &[0x00];

const TAG_NEW: u8 = 0;
const TAG_IN_MESSAGE: u8 = 1;
const TAG_OUT_MESSAGE: u8 = 2;
const TAG_IN_CLOSE: u8 = 3;
const TAG_OUT_CLOSE: u8 = 4;
const TAG_IN_RESET: u8 = 5;
const TAG_OUT_RESET: u8 = 6;

/// Which end of a stream sent a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The side that sent `NEW` for this stream.
    Opener,
    /// The side that accepted the stream.
    Acceptor,
}

impl Origin {
    /// Origin of frames written by a channel with the given initiator flag.
    pub fn for_initiator(initiator: bool) -> Self {
        if initiator {
            Self::Opener
        } else {
            Self::Acceptor
        }
    }

    /// Whether a frame with this origin was written by the opening side.
    pub fn is_opener(self) -> bool {
        matches!(self, Self::Opener)
    }
}

/// What a frame does to its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    New,
    Message,
    Close,
    Reset,
}

impl FrameKind {
    fn from_tag(tag: u8) -> Result<(Self, Origin)> {
        match tag {
            TAG_NEW => Ok((Self::New, Origin::Opener)),
            TAG_IN_MESSAGE => Ok((Self::Message, Origin::Opener)),
            TAG_OUT_MESSAGE => Ok((Self::Message, Origin::Acceptor)),
            TAG_IN_CLOSE => Ok((Self::Close, Origin::Opener)),
            TAG_OUT_CLOSE => Ok((Self::Close, Origin::Acceptor)),
            TAG_IN_RESET => Ok((Self::Reset, Origin::Opener)),
            TAG_OUT_RESET => Ok((Self::Reset, Origin::Acceptor)),
            other => Err(ProtocolError::InvalidType(other)),
        }
    }

    fn tag(self, origin: Origin) -> u8 {
        match (self, origin) {
            (Self::New, _) => TAG_NEW,
            (Self::Message, Origin::Opener) => TAG_IN_MESSAGE,
            (Self::Message, Origin::Acceptor) => TAG_OUT_MESSAGE,
            (Self::Close, Origin::Opener) => TAG_IN_CLOSE,
            (Self::Close, Origin::Acceptor) => TAG_OUT_CLOSE,
            (Self::Reset, Origin::Opener) => TAG_IN_RESET,
            (Self::Reset, Origin::Acceptor) => TAG_OUT_RESET,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "NEW",
            Self::Message => "MESSAGE",
            Self::Close => "CLOSE",
            Self::Reset => "RESET",
        })
    }
}

/// One decoded mplex frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream id, scoped by `origin` (both sides may use the same number).
    pub stream_id: u64,
    /// Which end of the stream wrote this frame.
    pub origin: Origin,
    /// Frame type.
    pub kind: FrameKind,
    /// Stream name for `NEW`, data for `MESSAGE`, ignored otherwise.
    pub payload: Bytes,
}

impl Frame {
    /// A `NEW` frame. `name` is the stream name, or empty to mean "the id".
    pub fn new_stream(stream_id: u64, name: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            origin: Origin::Opener,
            kind: FrameKind::New,
            payload: name.into(),
        }
    }

    /// A `MESSAGE` frame carrying `data`.
    pub fn message(stream_id: u64, origin: Origin, data: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            origin,
            kind: FrameKind::Message,
            payload: data.into(),
        }
    }

    /// A `CLOSE` frame (half-close of the sender's direction).
    pub fn close(stream_id: u64, origin: Origin) -> Self {
        Self {
            stream_id,
            origin,
            kind: FrameKind::Close,
            payload: Bytes::from_static(CLOSE_BODY),
        }
    }

    /// A `RESET` frame (abort both directions).
    pub fn reset(stream_id: u64, origin: Origin) -> Self {
        Self {
            stream_id,
            origin,
            kind: FrameKind::Reset,
            payload: Bytes::new(),
        }
    }

    /// The 3-bit wire tag for this frame.
    pub fn tag(&self) -> u8 {
        self.kind.tag(self.origin)
    }

    /// The conventional mplex name of this frame's tag, e.g. `IN_MESSAGE`.
    pub fn tag_name(&self) -> &'static str {
        match self.tag() {
            TAG_NEW => "NEW",
            TAG_IN_MESSAGE => "IN_MESSAGE",
            TAG_OUT_MESSAGE => "OUT_MESSAGE",
            TAG_IN_CLOSE => "IN_CLOSE",
            TAG_OUT_CLOSE => "OUT_CLOSE",
            TAG_IN_RESET => "IN_RESET",
            _ => "OUT_RESET",
        }
    }

    fn header(&self) -> u64 {
        (self.stream_id << 3) | u64::from(self.tag())
    }

    /// The total wire size of this frame (header + length + payload).
    pub fn wire_size(&self) -> usize {
        let header = varint::encoded_len(self.header());
        match self.kind {
            FrameKind::Reset => header,
            _ => {
                header + varint::encoded_len(self.payload.len() as u64) + self.payload.len()
            }
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────┬──────────────────┬───────────────────┐
/// │ varint(id << 3 | tag)    │ varint(length)   │ payload           │
/// │                          │ (absent on RESET)│ (absent on RESET) │
/// └──────────────────────────┴──────────────────┴───────────────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut, max_payload: usize) -> Result<()> {
    if frame.stream_id > MAX_STREAM_ID {
        return Err(ProtocolError::StreamIdOverflow(frame.stream_id));
    }
    if frame.kind != FrameKind::Reset && frame.payload.len() > max_payload {
        return Err(ProtocolError::Oversize {
            size: frame.payload.len(),
            max: max_payload,
        });
    }

    dst.reserve(frame.wire_size());
    varint::encode(frame.header(), dst);
    if frame.kind != FrameKind::Reset {
        varint::encode(frame.payload.len() as u64, dst);
        dst.put_slice(&frame.payload);
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet,
/// leaving the buffer untouched so decoding can resume once more bytes arrive.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some((header, header_len)) = varint::decode(&src[..])? else {
        return Ok(None);
    };
    let (kind, origin) = FrameKind::from_tag((header & 0b111) as u8)?;
    let stream_id = header >> 3;

    if kind == FrameKind::Reset {
        src.advance(header_len);
        return Ok(Some(Frame::reset(stream_id, origin)));
    }

    let Some((declared, len_len)) = varint::decode(&src[header_len..])? else {
        return Ok(None);
    };
    let payload_len = usize::try_from(declared).unwrap_or(usize::MAX);
    if payload_len > max_payload {
        return Err(ProtocolError::Oversize {
            size: payload_len,
            max: max_payload,
        });
    }

    let prefix = header_len + len_len;
    if src.len() < prefix + payload_len {
        return Ok(None);
    }

    src.advance(prefix);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        stream_id,
        origin,
        kind,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
