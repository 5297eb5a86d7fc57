//! Header bitfield layout.
//!
//! ```text
//! bits 0-3    primary class      SEND REQUEST RESPONSE ERROR
//! bits 4-9    stream sub-message OPEN CLOSE PAUSE RESUME DATA END  (with SEND only)
//! bits 10-11  stream status      IS_INITIATOR HAS_ERROR            (OPEN/CLOSE only)
//! ```

/// One-way message, also the carrier for every stream sub-message.
pub const SEND: u64 = 0b0001;
/// Call expecting a `RESPONSE` or `ERROR` with the same id.
pub const REQUEST: u64 = 0b0010;
/// Successful answer to a `REQUEST`.
pub const RESPONSE: u64 = 0b0100;
/// Failed answer to a `REQUEST`; payload is an error message.
pub const ERROR: u64 = 0b1000;

pub const CLASS_MASK: u64 = 0b1111;

pub const OPEN: u64 = 1 << 4;
pub const CLOSE: u64 = 2 << 4;
pub const PAUSE: u64 = 4 << 4;
pub const RESUME: u64 = 8 << 4;
pub const DATA: u64 = 16 << 4;
pub const END: u64 = 32 << 4;

pub const STREAM_MASK: u64 = 0b11_1111 << 4;

/// Set on the creator's `OPEN`, and on a `CLOSE` addressed by the creator's id.
pub const IS_INITIATOR: u64 = 1 << 10;
/// Set on `CLOSE` frames whose payload is an error message.
pub const HAS_ERROR: u64 = 1 << 11;

/// Returns true for frames travelling towards a method's request path.
pub fn is_request_class(bitfield: u64) -> bool {
    bitfield & (SEND | REQUEST) != 0
}

/// The stream sub-message bits, zero for plain requests and sends.
pub fn stream_message(bitfield: u64) -> u64 {
    if bitfield & SEND == 0 {
        return 0;
    }
    bitfield & STREAM_MASK
}

/// Returns true if a frame with this bitfield is followed by a payload.
pub fn carries_payload(bitfield: u64) -> bool {
    match stream_message(bitfield) {
        0 => bitfield & CLASS_MASK != 0,
        DATA => true,
        OPEN => bitfield & IS_INITIATOR == 0,
        CLOSE => bitfield & HAS_ERROR != 0,
        _ => false,
    }
}

/// Human-readable rendering of a bitfield, e.g. `SEND|OPEN|IS_INITIATOR`.
pub fn describe(bitfield: u64) -> String {
    const NAMES: [(u64, &str); 12] = [
        (SEND, "SEND"),
        (REQUEST, "REQUEST"),
        (RESPONSE, "RESPONSE"),
        (ERROR, "ERROR"),
        (OPEN, "OPEN"),
        (CLOSE, "CLOSE"),
        (PAUSE, "PAUSE"),
        (RESUME, "RESUME"),
        (DATA, "DATA"),
        (END, "END"),
        (IS_INITIATOR, "IS_INITIATOR"),
        (HAS_ERROR, "HAS_ERROR"),
    ];

    let mut parts: Vec<String> = NAMES
        .iter()
        .filter(|(bit, _)| bitfield & bit != 0)
        .map(|(_, name)| name.to_string())
        .collect();
    let unknown = bitfield & !(CLASS_MASK | STREAM_MASK | IS_INITIATOR | HAS_ERROR);
    if unknown != 0 {
        parts.push(format!("{unknown:#x}"));
    }
    if parts.is_empty() {
        return "NONE".to_string();
    }
    parts.join("|")
}
