use std::fs;

use bytes::Bytes;
use plexmux_engine::{connect, MuxConfig};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    channel_error, io_error, mux_error, outcome_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_channel, ChannelRecord, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let mux = connect(&args.endpoint, config)
        .await
        .map_err(|err| mux_error("connect failed", err))?;
    let mut channel = mux
        .create_stream(None, args.name.clone().map(Bytes::from))
        .map_err(|err| mux_error("open failed", err))?;

    // Announce the stream even when there is nothing to write, so the peer
    // still sees it open and close.
    channel.open_chan();
    let size = payload.len();
    if !payload.is_empty() {
        channel
            .write(payload)
            .map_err(|err| channel_error("send failed", err))?;
    }
    channel
        .finish()
        .map_err(|err| channel_error("send failed", err))?;
    info!(stream_id = channel.id(), size, "sent channel");

    if args.wait {
        let reply = match tokio::time::timeout(wait_timeout, channel.read_to_end()).await {
            Ok(result) => result.map_err(|err| channel_error("receive failed", err))?,
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {}", args.wait_timeout),
                ))
            }
        };
        let record = ChannelRecord::new(
            channel.id(),
            channel.name(),
            channel.initiator(),
            mux.label(),
            reply,
        );
        print_channel(&record, format);
    }

    mux.close();
    mux.closed()
        .await
        .map_err(|err| outcome_error("connection failed", err))?;

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::from(json.clone()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::from(data.clone()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Bytes::new())
}
