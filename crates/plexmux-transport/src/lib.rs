//! Duplex byte transports for plexmux.
//!
//! Provides a unified async stream over the transports a multiplexer is
//! usually run on:
//! - TCP sockets
//! - Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of plexmux. The multiplexer itself accepts any
//! `AsyncRead + AsyncWrite` value; [`PlexStream`] is simply the one the
//! bundled connectors and the CLI hand it.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::TransportListener;
pub use stream::PlexStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
