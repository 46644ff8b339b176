use std::sync::atomic::{AtomicU64, Ordering};

use plexmux_transport::{Endpoint, PlexStream, TransportListener};
use tracing::info;

use crate::channel::Channel;
use crate::config::MuxConfig;
use crate::error::Result;
use crate::multiplexer::Multiplexer;

/// Listens for connections and runs a multiplexer over each one.
pub struct MuxListener {
    listener: TransportListener,
    config: MuxConfig,
    next_peer_id: AtomicU64,
}

impl MuxListener {
    /// Bind to `endpoint` (TCP address or Unix socket path).
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let listener = TransportListener::bind(endpoint).await?;
        Ok(Self {
            listener,
            config: MuxConfig::default(),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Override the configuration given to each accepted multiplexer.
    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection. Its multiplexer is labelled `peer-N`.
    pub async fn accept(&self) -> Result<Multiplexer> {
        let (stream, config) = self.accept_stream().await?;
        Ok(Multiplexer::new(stream, config))
    }

    /// Accept the next connection and hand every channel it opens to `handler`.
    pub async fn accept_with_handler<F>(&self, handler: F) -> Result<Multiplexer>
    where
        F: FnMut(Channel) + Send + 'static,
    {
        let (stream, config) = self.accept_stream().await?;
        Ok(Multiplexer::with_handler(stream, config, handler))
    }

    async fn accept_stream(&self) -> Result<(PlexStream, MuxConfig)> {
        let stream = self.listener.accept().await?;
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let label = format!("peer-{id}");
        info!(peer = %stream.peer_label(), %label, "accepted connection");
        let config = self
            .config
            .clone()
            .with_initiator(false)
            .with_label(label);
        Ok((stream, config))
    }

    /// The endpoint actually bound.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        Ok(self.listener.local_endpoint()?)
    }
}
