//! Stream multiplexing over a single duplex byte stream.
//!
//! A [`Multiplexer`] owns one transport connection and carries any number of
//! [`Channel`]s over it using the mplex wire protocol. Each channel is an
//! independent, half-closable byte stream; channels opened by the peer are
//! delivered through [`Multiplexer::accept`] or a handler.
//!
//! Writes never wait on the transport: outbound frames queue without bound
//! and are flushed by the multiplexer's driver task in the order they were
//! written.

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod listener;
pub mod multiplexer;
mod registry;

pub use channel::{Channel, ChannelReader, ChannelWriter, End};
pub use config::MuxConfig;
pub use connector::{connect, connect_with_handler};
pub use error::{ChannelError, MuxError, Result};
pub use listener::MuxListener;
pub use multiplexer::{Multiplexer, Outcome};
