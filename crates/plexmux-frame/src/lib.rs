//! Varint-framed wire codec for stream multiplexing.
//!
//! Every frame on the wire is:
//! - A varint header: `stream_id << 3 | tag`
//! - For every tag but RESET, a varint payload length followed by the payload
//!
//! The 3-bit tag says what the frame is (`NEW`, `MESSAGE`, `CLOSE`, `RESET`)
//! and which side of the stream sent it. In memory that split is kept as two
//! explicit fields, [`FrameKind`] and [`Origin`]; the compact tag exists only
//! at the codec boundary.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod reader;
pub mod varint;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameKind, Origin, DEFAULT_MAX_PAYLOAD,
    MAX_STREAM_ID,
};
pub use error::{ProtocolError, Result};
#[cfg(feature = "async")]
pub use framed::PlexCodec;
pub use reader::FrameReader;
