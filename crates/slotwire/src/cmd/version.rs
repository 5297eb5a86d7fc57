use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("slotwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: slotwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("SLOTWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("SLOTWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("rust_version: {}", env!("CARGO_PKG_RUST_VERSION"));
    println!(
        "frame: max_payload={} magic=optional",
        slotwire_frame::DEFAULT_MAX_PAYLOAD
    );
    println!(
        "session: high_water_mark={}",
        slotwire_session::DEFAULT_HIGH_WATER_MARK
    );

    Ok(SUCCESS)
}
