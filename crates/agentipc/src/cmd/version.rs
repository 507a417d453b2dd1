use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("agentipc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: agentipc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("AGENTIPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "request_header: {} bytes, max payload {}",
        agentipc_frame::HEADER_SIZE,
        agentipc_frame::MAX_REQUEST_LEN
    );
    println!(
        "reply_header: {} bytes, max body {}",
        agentipc_frame::REPLY_HEADER_SIZE,
        agentipc_frame::MAX_REPLY_LEN
    );
    println!(
        "channel_defaults: capacity={}, request_timeout={:?}",
        agentipc_channel::DEFAULT_CAPACITY,
        agentipc_channel::DEFAULT_REQUEST_TIMEOUT
    );

    Ok(SUCCESS)
}
