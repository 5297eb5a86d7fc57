use bytes::Bytes;
use slotwire_encoding::{Codec, Value, ValueCodec};

use crate::cmd::ValueCommand;
use crate::exit::{codec_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{from_hex, to_hex};

pub fn run(command: ValueCommand) -> CliResult<i32> {
    match command {
        ValueCommand::Encode(args) => {
            println!("{}", encode(&args.json)?);
        }
        ValueCommand::Decode(args) => {
            let json = decode(&args.hex)?;
            let text = if args.pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            }
            .map_err(|err| CliError::new(INTERNAL, err.to_string()))?;
            println!("{text}");
        }
    }
    Ok(SUCCESS)
}

fn encode(json: &str) -> CliResult<String> {
    let parsed: serde_json::Value =
        serde_json::from_str(json).map_err(|err| CliError::invalid(format!("json: {err}")))?;
    Ok(to_hex(&ValueCodec.to_bytes(&Value::from(&parsed))))
}

fn decode(hex: &str) -> CliResult<serde_json::Value> {
    let bytes = from_hex(hex).map_err(|err| CliError::usage(format!("hex: {err}")))?;
    let mut src = Bytes::from(bytes);
    let value = ValueCodec
        .decode(&mut src)
        .map_err(|err| codec_error("value", err))?;
    if !src.is_empty() {
        return Err(CliError::invalid(format!(
            "value: {} trailing bytes",
            src.len()
        )));
    }
    Ok(value.to_json())
}
