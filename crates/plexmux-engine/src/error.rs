use plexmux_frame::ProtocolError;
use plexmux_transport::TransportError;

/// Errors that end a whole multiplexed connection.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The peer broke the wire protocol; the byte stream is unsynchronized.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The multiplexer has already shut down.
    #[error("multiplexer closed")]
    Closed,
}

impl MuxError {
    /// Classify an error surfaced by the frame codec.
    ///
    /// The codec reports transport I/O failures as `ProtocolError::Io`; those
    /// belong to the transport, not to the peer's framing.
    pub(crate) fn from_codec(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => Self::Transport(TransportError::Io(io)),
            other => Self::Protocol(other),
        }
    }
}

/// Why a single channel ended abnormally.
///
/// Cloned into every place that observes the end: the reader's final item,
/// failed writes, and the channel's recorded reset reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The peer sent RESET.
    #[error("stream reset by peer")]
    Reset,

    /// The local side aborted the stream.
    #[error("stream aborted: {0}")]
    Aborted(String),

    /// The transport reached EOF while the stream was still live.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport failed while the stream was still live.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The connection was torn down by a protocol violation.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The local multiplexer was closed.
    #[error("multiplexer closed")]
    MuxClosed,

    /// A write arrived after the local write side had already ended.
    #[error("write after end")]
    WriteAfterEnd,
}

impl From<&MuxError> for ChannelError {
    fn from(err: &MuxError) -> Self {
        match err {
            MuxError::Protocol(err) => Self::Protocol(err.to_string()),
            MuxError::Transport(err) => Self::Transport(err.to_string()),
            MuxError::Closed => Self::MuxClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_io_errors_are_transport_failures() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err = MuxError::from_codec(ProtocolError::Io(io));
        assert!(matches!(err, MuxError::Transport(TransportError::Io(_))));

        let err = MuxError::from_codec(ProtocolError::InvalidType(7));
        assert!(matches!(err, MuxError::Protocol(ProtocolError::InvalidType(7))));
    }

    #[test]
    fn channel_error_mirrors_mux_error() {
        let err = MuxError::Protocol(ProtocolError::DuplicateStream(3));
        assert_eq!(
            ChannelError::from(&err),
            ChannelError::Protocol("stream 3 already exists".to_string())
        );
        assert_eq!(ChannelError::from(&MuxError::Closed), ChannelError::MuxClosed);
    }
}
