use std::path::PathBuf;

use clap::{Args, Subcommand};
use slotwire_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod selftest;
pub mod value;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode frames from a capture and print them.
    Decode(DecodeArgs),
    /// Encode JSON with the value codec, or decode it back.
    #[command(subcommand)]
    Value(ValueCommand),
    /// Exercise an in-memory session pair and report the results.
    Selftest(SelftestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Value(command) => value::run(command),
        Command::Selftest(args) => selftest::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file to read. Reads stdin when omitted or `-`.
    #[arg(conflicts_with = "hex")]
    pub input: Option<PathBuf>,
    /// Decode frames from a hex string instead of a file.
    #[arg(long)]
    pub hex: Option<String>,
    /// Magic byte expected before every frame header (e.g. 0x5a).
    #[arg(long, value_parser = parse_byte)]
    pub magic: Option<u8>,
    /// Largest accepted payload, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Subcommand, Debug)]
pub enum ValueCommand {
    /// Encode a JSON document and print the bytes as hex.
    Encode(ValueEncodeArgs),
    /// Decode hex bytes and print the value as JSON.
    Decode(ValueDecodeArgs),
}

#[derive(Args, Debug)]
pub struct ValueEncodeArgs {
    /// JSON document.
    pub json: String,
}

#[derive(Args, Debug)]
pub struct ValueDecodeArgs {
    /// Hex-encoded value.
    pub hex: String,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    /// Magic byte both sessions put before every frame.
    #[arg(long, value_parser = parse_byte)]
    pub magic: Option<u8>,
    /// Items a stream reader queues before pausing its writer.
    #[arg(long, default_value_t = slotwire_session::DEFAULT_HIGH_WATER_MARK)]
    pub high_water_mark: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|err| format!("invalid byte {text:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_bytes() {
        assert_eq!(parse_byte("90").unwrap(), 90);
        assert_eq!(parse_byte("0x5a").unwrap(), 0x5a);
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("x").is_err());
    }
}
