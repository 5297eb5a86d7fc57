use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use slotwire_frame::{FrameConfig, FrameError, FrameReader};
use tracing::debug;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS};
use crate::output::{from_hex, print_frames, FrameOutput, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FrameConfig {
        magic: args.magic,
        max_payload_size: args.max_payload,
    };

    let frames = match (&args.hex, args.input.as_deref()) {
        (Some(hex), _) => {
            let bytes = from_hex(hex).map_err(|err| CliError::usage(format!("--hex: {err}")))?;
            decode(bytes.as_slice(), config)?
        }
        (None, Some(path)) if path != Path::new("-") => {
            let file = File::open(path).map_err(|err| io_error(&path.display().to_string(), err))?;
            decode(file, config)?
        }
        (None, _) => decode(io::stdin().lock(), config)?,
    };

    print_frames(&frames, format);
    Ok(SUCCESS)
}

/// Read frames until a clean end of input. Bytes left over are an error.
fn decode<R: Read>(input: R, config: FrameConfig) -> CliResult<Vec<FrameOutput>> {
    let mut reader = FrameReader::with_config(input, config);
    let mut frames = Vec::new();
    let mut offset = 0;

    loop {
        match reader.read_frame() {
            Ok(frame) => {
                let size = frame.wire_size(reader.config());
                frames.push(FrameOutput::new(frames.len(), offset, &frame));
                offset += size;
            }
            Err(FrameError::ConnectionClosed) if reader.buffered() == 0 => break,
            Err(FrameError::ConnectionClosed) => {
                let err = FrameError::Truncated {
                    remaining: reader.buffered(),
                };
                return Err(frame_error(&format!("frame {} at offset {offset}", frames.len()), err));
            }
            Err(err) => {
                return Err(frame_error(&format!("frame {} at offset {offset}", frames.len()), err));
            }
        }
    }

    debug!(frames = frames.len(), bytes = offset, "capture decoded");
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use slotwire_frame::flags::{CLOSE, HAS_ERROR, REQUEST, RESPONSE, SEND};
    use slotwire_frame::{encode_frame, ErrorMessage, Frame};

    use super::*;
    use crate::exit::DATA_INVALID;

    fn capture(frames: &[Frame], config: &FrameConfig) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, config, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn decodes_frames_with_offsets() {
        let config = FrameConfig::default();
        let bytes = capture(
            &[
                Frame::new(1, 1, REQUEST, Some(Bytes::from_static(b"hi"))),
                Frame::new(1, 1, RESPONSE, Some(Bytes::from_static(b"ok!"))),
                Frame::new(
                    2,
                    5,
                    SEND | CLOSE | HAS_ERROR,
                    Some(ErrorMessage::new("gone").to_bytes()),
                ),
            ],
            &config,
        );

        let frames = decode(bytes.as_slice(), config).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].offset, 0);
        // method, id, bitfield, length, payload
        assert_eq!(frames[1].offset, 6);
        assert_eq!(frames[1].payload.as_deref(), Some("6f6b21"));
        assert_eq!(
            frames[2].error.as_ref().and_then(|e| e.message.as_deref()),
            Some("gone")
        );
    }

    #[test]
    fn magic_mismatch_is_invalid_data() {
        let written = FrameConfig {
            magic: Some(0x5a),
            ..FrameConfig::default()
        };
        let bytes = capture(&[Frame::new(0, 0, SEND, Some(Bytes::new()))], &written);

        let expected = FrameConfig {
            magic: Some(0x5b),
            ..FrameConfig::default()
        };
        let err = decode(bytes.as_slice(), expected).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert!(decode(bytes.as_slice(), written).is_ok());
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let mut bytes = capture(
            &[Frame::new(0, 1, REQUEST, Some(Bytes::from_static(b"x")))],
            &FrameConfig::default(),
        );
        bytes.extend_from_slice(&[0, 2, REQUEST as u8, 9]);

        let err = decode(bytes.as_slice(), FrameConfig::default()).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("frame 1"), "{}", err.message);
    }

    #[test]
    fn empty_input_has_no_frames() {
        let frames = decode(io::empty(), FrameConfig::default()).unwrap();
        assert!(frames.is_empty());
    }
}
