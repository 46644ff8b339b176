use plexmux_engine::{
    Channel, ChannelError, ChannelReader, ChannelWriter, Multiplexer, MuxConfig, MuxListener,
};
use tracing::{debug, info, warn};

use crate::cmd::{interrupted, EchoArgs};
use crate::exit::{mux_error, CliResult, SUCCESS};

pub async fn run(args: EchoArgs, config: MuxConfig) -> CliResult<i32> {
    let listener = MuxListener::bind(&args.endpoint)
        .await
        .map_err(|err| mux_error("bind failed", err))?
        .with_config(config);
    info!(endpoint = %args.endpoint, "echo server listening");

    let shutdown = interrupted();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let mux = accepted.map_err(|err| mux_error("accept failed", err))?;
                tokio::spawn(serve_connection(mux));
            }
        }
    }

    Ok(SUCCESS)
}

async fn serve_connection(mut mux: Multiplexer) {
    while let Some(channel) = mux.accept().await {
        tokio::spawn(echo_channel(channel));
    }
    match mux.closed().await {
        Ok(()) => debug!(peer = mux.label(), "connection ended"),
        Err(err) => warn!(peer = mux.label(), error = %err, "connection failed"),
    }
}

async fn echo_channel(channel: Channel) {
    let stream_id = channel.id();
    let (reader, writer) = channel.split();
    match pump(reader, writer).await {
        Ok(bytes) => info!(stream_id, bytes, "echoed channel"),
        Err(err) => debug!(stream_id, error = %err, "channel ended early"),
    }
}

/// Write every inbound chunk straight back, then end the write side when the
/// peer ends theirs. Returns the number of bytes echoed.
async fn pump(
    mut reader: ChannelReader,
    mut writer: ChannelWriter,
) -> Result<usize, ChannelError> {
    let mut echoed = 0usize;
    while let Some(chunk) = reader.read().await? {
        echoed = echoed.saturating_add(chunk.len());
        writer.write(chunk)?;
    }
    writer.finish()?;
    Ok(echoed)
}
