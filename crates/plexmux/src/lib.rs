//! Stream multiplexing over a single duplex byte stream.
//!
//! plexmux carries many independent, half-closable byte channels over one
//! connection using the mplex wire format, so it interoperates with other
//! mplex peers.
//!
//! # Crate Structure
//!
//! - [`transport`] - TCP and Unix domain socket streams and listeners
//! - [`frame`] - Varint-framed wire codec (`NEW`, `MESSAGE`, `CLOSE`, `RESET`)
//! - [`engine`] - Channel state machine and multiplexer driver (behind `engine` feature)

/// Re-export transport types.
pub mod transport {
    pub use plexmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use plexmux_frame::*;
}

/// Re-export multiplexer types (requires `engine` feature).
#[cfg(feature = "engine")]
pub mod engine {
    pub use plexmux_engine::*;
}

#[cfg(feature = "engine")]
pub use plexmux_engine::{connect, Channel, Multiplexer, MuxConfig, MuxListener};
