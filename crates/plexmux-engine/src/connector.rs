use plexmux_transport::{Endpoint, PlexStream};
use tracing::info;

use crate::channel::Channel;
use crate::config::MuxConfig;
use crate::error::Result;
use crate::multiplexer::Multiplexer;

/// Dial `endpoint` and run a multiplexer over the connection.
///
/// Accepted channels are read with [`Multiplexer::accept`].
pub async fn connect(endpoint: &Endpoint, config: MuxConfig) -> Result<Multiplexer> {
    let stream = dial(endpoint).await?;
    Ok(Multiplexer::new(stream, dialer_config(endpoint, config)))
}

/// Dial `endpoint` and hand every channel the peer opens to `handler`.
pub async fn connect_with_handler<F>(
    endpoint: &Endpoint,
    config: MuxConfig,
    handler: F,
) -> Result<Multiplexer>
where
    F: FnMut(Channel) + Send + 'static,
{
    let stream = dial(endpoint).await?;
    Ok(Multiplexer::with_handler(
        stream,
        dialer_config(endpoint, config),
        handler,
    ))
}

async fn dial(endpoint: &Endpoint) -> Result<PlexStream> {
    let stream = PlexStream::connect(endpoint).await?;
    info!(%endpoint, "connected");
    Ok(stream)
}

fn dialer_config(endpoint: &Endpoint, config: MuxConfig) -> MuxConfig {
    config.with_initiator(true).with_label(endpoint.to_string())
}
