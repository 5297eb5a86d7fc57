mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "slotwire", version, about = "slotwire frame and session tooling")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true, env = "SLOTWIRE_LOG")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ValueCommand;

    #[test]
    fn parses_decode_with_magic() {
        let cli = Cli::try_parse_from(["slotwire", "decode", "capture.bin", "--magic", "0x5a"])
            .expect("decode args should parse");

        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.magic, Some(0x5a));
        assert_eq!(args.input.as_deref(), Some(std::path::Path::new("capture.bin")));
    }

    #[test]
    fn rejects_file_and_hex_together() {
        let err = Cli::try_parse_from(["slotwire", "decode", "capture.bin", "--hex", "00"])
            .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_value_subcommands() {
        let cli = Cli::try_parse_from(["slotwire", "value", "decode", "0507", "--pretty"])
            .expect("value args should parse");
        assert!(matches!(
            cli.command,
            Command::Value(ValueCommand::Decode(ref args)) if args.pretty
        ));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "slotwire",
            "selftest",
            "--format",
            "json",
            "--log-level",
            "trace",
            "--high-water-mark",
            "4",
        ])
        .expect("selftest args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.log_level, LogLevel::Trace));
        assert!(matches!(cli.command, Command::Selftest(ref args) if args.high_water_mark == 4));
    }
}
