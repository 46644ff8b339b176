mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;
use plexmux_engine::MuxConfig;
use plexmux_frame::DEFAULT_MAX_PAYLOAD;

use crate::cmd::Command;
use crate::exit::{CliError, INTERNAL};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "plexmux", version, about = "Stream multiplexer CLI (mplex wire format)")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Largest MESSAGE payload sent or accepted, in bytes.
    #[arg(
        long,
        value_name = "BYTES",
        env = "PLEXMUX_MAX_MESSAGE_SIZE",
        default_value_t = DEFAULT_MAX_PAYLOAD,
        value_parser = parse_message_size,
        global = true
    )]
    max_message_size: usize,

    #[command(subcommand)]
    command: Command,
}

fn parse_message_size(input: &str) -> Result<usize, String> {
    match input.trim().parse::<usize>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let config = MuxConfig::default().with_max_message_size(cli.max_message_size);

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime start failed: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, format, config)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
