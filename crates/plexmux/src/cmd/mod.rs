use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use plexmux_engine::MuxConfig;
use plexmux_transport::Endpoint;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod dump;
pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve channels and write every byte received on each back to its sender.
    Echo(EchoArgs),
    /// Open one channel, write a payload and end it.
    Send(SendArgs),
    /// Serve channels and print each one's payload once the peer ends it.
    Listen(ListenArgs),
    /// Decode a captured wire byte stream into frames.
    Dump(DumpArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, config).await,
        Command::Send(args) => send::run(args, format, config).await,
        Command::Listen(args) => listen::run(args, format, config).await,
        Command::Dump(args) => dump::run(args, format, &config),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Endpoint to bind (socket path, host:port, tcp:// or unix:// URL).
    pub endpoint: Endpoint,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    /// Channel name announced to the peer. Default: the channel id.
    #[arg(long, short = 'n')]
    pub name: Option<String>,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for the peer to end its side of the channel and print what it sent.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Endpoint to bind.
    pub endpoint: Endpoint,
    /// Exit after printing N channels.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Capture file holding raw wire bytes, or `-` for stdin.
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Resolves once the process receives Ctrl-C.
///
/// If the handler cannot be installed the future never resolves, so commands
/// keep running until killed.
pub async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "signal handler setup failed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration(" 3 ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5m").is_err());
    }
}
