/// Wire-level protocol violations.
///
/// Any of these seen on the inbound frame stream means the byte stream can no
/// longer be trusted; the multiplexer treats them as connection-fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The input ended in the middle of a frame.
    #[error("input ended mid-frame")]
    Truncated,

    /// The low 3 header bits do not name a known frame type.
    #[error("invalid frame type tag {0}")]
    InvalidType(u8),

    /// A declared or supplied payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    Oversize { size: usize, max: usize },

    /// A varint ran past 64 bits.
    #[error("malformed varint")]
    InvalidVarint,

    /// The stream id does not fit the 61 bits left beside the tag.
    #[error("stream id {0} out of range")]
    StreamIdOverflow(u64),

    /// A `NEW` frame named a stream id that is already live.
    #[error("stream {0} already exists")]
    DuplicateStream(u64),

    /// A frame referenced a stream id that is not registered.
    #[error("unknown stream {0}")]
    UnknownStream(u64),

    /// An I/O error reached the codec from the underlying transport.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
