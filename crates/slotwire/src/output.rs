use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use slotwire_frame::flags::{self, CLOSE, ERROR, HAS_ERROR};
use slotwire_frame::{ErrorMessage, Frame};

/// Payload bytes shown before the preview is cut short.
const PREVIEW_BYTES: usize = 32;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub errno: u64,
    pub message: Option<String>,
    pub code: Option<String>,
    pub stack: Option<String>,
}

impl From<ErrorMessage> for ErrorOutput {
    fn from(msg: ErrorMessage) -> Self {
        Self {
            errno: msg.errno,
            message: msg.message,
            code: msg.code,
            stack: msg.stack,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FrameOutput {
    pub index: usize,
    pub offset: usize,
    pub method: u64,
    pub id: u64,
    pub bitfield: u64,
    pub flags: String,
    pub payload_size: Option<usize>,
    pub payload: Option<String>,
    pub error: Option<ErrorOutput>,
}

impl FrameOutput {
    pub fn new(index: usize, offset: usize, frame: &Frame) -> Self {
        let carries_error = frame.bitfield & ERROR != 0
            || (flags::stream_message(frame.bitfield) == CLOSE && frame.bitfield & HAS_ERROR != 0);
        let error = frame
            .payload
            .as_ref()
            .filter(|_| carries_error)
            .and_then(|payload| ErrorMessage::from_payload(payload).ok())
            .map(ErrorOutput::from);

        Self {
            index,
            offset,
            method: frame.method,
            id: frame.id,
            bitfield: frame.bitfield,
            flags: flags::describe(frame.bitfield),
            payload_size: frame.payload.as_ref().map(|p| p.len()),
            payload: frame.payload.as_deref().map(preview),
            error,
        }
    }

    fn summary(&self) -> String {
        match &self.error {
            Some(err) => format!(
                "error: {} ({})",
                err.message.as_deref().unwrap_or("-"),
                err.code.as_deref().unwrap_or("-")
            ),
            None => self.payload.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub fn print_frames(frames: &[FrameOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for frame in frames {
                print_json(frame);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "OFFSET", "METHOD", "ID", "FLAGS", "SIZE", "PAYLOAD"]);
            for frame in frames {
                table.add_row(vec![
                    frame.index.to_string(),
                    frame.offset.to_string(),
                    frame.method.to_string(),
                    frame.id.to_string(),
                    frame.flags.clone(),
                    frame.payload_size.map_or("-".to_string(), |n| n.to_string()),
                    frame.summary(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "#{} @{} method={} id={} flags={} {}",
                    frame.index,
                    frame.offset,
                    frame.method,
                    frame.id,
                    frame.flags,
                    frame.summary()
                );
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckOutput {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

pub fn print_checks(checks: &[CheckOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Report<'a> {
                passed: bool,
                checks: &'a [CheckOutput],
            }
            print_json(&Report {
                passed: checks.iter().all(|check| check.passed),
                checks,
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHECK", "STATUS", "DETAIL"]);
            for check in checks {
                table.add_row(vec![
                    check.name.to_string(),
                    status(check.passed).to_string(),
                    check.detail.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for check in checks {
                println!("[{}] {}: {}", status(check.passed), check.name, check.detail);
            }
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn status(passed: bool) -> &'static str {
    if passed {
        "ok"
    } else {
        "FAIL"
    }
}

/// Lowercase hex without separators.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Parse hex, ignoring whitespace and an optional `0x` prefix.
pub fn from_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("invalid hex at offset {i}: {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn preview(payload: &[u8]) -> String {
    if payload.len() <= PREVIEW_BYTES {
        return to_hex(payload);
    }
    format!("{}.. ({} bytes)", to_hex(&payload[..PREVIEW_BYTES]), payload.len())
}
