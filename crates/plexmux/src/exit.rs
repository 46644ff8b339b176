use std::fmt;
use std::io;
use std::sync::Arc;

use plexmux_engine::{ChannelError, MuxError};
use plexmux_frame::ProtocolError;
use plexmux_transport::TransportError;

// Process exit codes. Stable across releases; scripts match on them.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint(_) | TransportError::Unsupported(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    match err {
        ProtocolError::Io(source) => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::Protocol(err) => protocol_error(context, err),
        MuxError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

/// Map the shared outcome reported by `Multiplexer::closed`.
pub fn outcome_error(context: &str, err: Arc<MuxError>) -> CliError {
    match Arc::try_unwrap(err) {
        Ok(err) => mux_error(context, err),
        Err(shared) => CliError::new(TRANSPORT_ERROR, format!("{context}: {shared}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match err {
        ChannelError::Reset | ChannelError::Aborted(_) => FAILURE,
        ChannelError::ConnectionClosed | ChannelError::Transport(_) => TRANSPORT_ERROR,
        ChannelError::Protocol(_) => DATA_INVALID,
        ChannelError::MuxClosed | ChannelError::WriteAfterEnd => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
