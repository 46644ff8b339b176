use plexmux_engine::{Channel, Multiplexer, MuxConfig, MuxListener};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cmd::{interrupted, ListenArgs};
use crate::exit::{mux_error, CliResult, SUCCESS};
use crate::output::{print_channel, ChannelRecord, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    let listener = MuxListener::bind(&args.endpoint)
        .await
        .map_err(|err| mux_error("bind failed", err))?
        .with_config(config);
    info!(endpoint = %args.endpoint, "listening");

    let shutdown = interrupted();
    tokio::pin!(shutdown);

    let (records_tx, mut records) = mpsc::unbounded_channel();
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let mux = accepted.map_err(|err| mux_error("accept failed", err))?;
                tokio::spawn(collect_connection(mux, records_tx.clone()));
            }
            Some(record) = records.recv() => {
                print_channel(&record, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    Ok(SUCCESS)
}

async fn collect_connection(mut mux: Multiplexer, records: mpsc::UnboundedSender<ChannelRecord>) {
    let peer = mux.label().to_string();
    while let Some(channel) = mux.accept().await {
        tokio::spawn(collect_channel(channel, peer.clone(), records.clone()));
    }
    match mux.closed().await {
        Ok(()) => debug!(%peer, "connection ended"),
        Err(err) => warn!(%peer, error = %err, "connection failed"),
    }
}

async fn collect_channel(
    mut channel: Channel,
    peer: String,
    records: mpsc::UnboundedSender<ChannelRecord>,
) {
    // Listen only reads; end our side right away so the channel can be
    // destroyed as soon as the peer finishes.
    if let Err(err) = channel.finish() {
        debug!(stream_id = channel.id(), error = %err, "could not end local side");
    }
    match channel.read_to_end().await {
        Ok(data) => {
            let record =
                ChannelRecord::new(channel.id(), channel.name(), channel.initiator(), &peer, data);
            let _ = records.send(record);
        }
        Err(err) => warn!(stream_id = channel.id(), error = %err, "channel ended with error"),
    }
}
