use plexmux_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Whether this side dialed the connection. Used for diagnostics only:
    /// the wire direction of each frame comes from the channel that sent it.
    pub initiator: bool,
    /// Largest MESSAGE payload sent or accepted. Larger writes are split
    /// across several frames. Default: 1 MiB. Zero is treated as 1.
    pub max_message_size: usize,
    /// Name attached to this connection's log records.
    pub label: String,
}

impl MuxConfig {
    pub fn with_initiator(mut self, initiator: bool) -> Self {
        self.initiator = initiator;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The payload limit actually applied, both to outbound splitting and
    /// to the codec.
    pub fn message_limit(&self) -> usize {
        self.max_message_size.max(1)
    }

    /// Codec settings derived from this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig::default().with_max_payload_size(self.message_limit())
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            initiator: false,
            max_message_size: DEFAULT_MAX_PAYLOAD,
            label: "mux".to_string(),
        }
    }
}
