use plexmux_frame::{DEFAULT_MAX_PAYLOAD, MAX_STREAM_ID};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("plexmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: plexmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("wire: mplex (tags NEW=0, IN_*=1/3/5, OUT_*=2/4/6)");
    println!("max_stream_id: {MAX_STREAM_ID}");
    println!("default_max_message_size: {DEFAULT_MAX_PAYLOAD}");
    println!(
        "transports: tcp=true, unix-domain-socket={}",
        cfg!(unix)
    );

    Ok(SUCCESS)
}
