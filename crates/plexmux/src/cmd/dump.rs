use std::fs::File;
use std::io::{self, Read};

use plexmux_engine::MuxConfig;
use plexmux_frame::{Frame, FrameReader};
use tracing::debug;

use crate::cmd::DumpArgs;
use crate::exit::{io_error, protocol_error, CliResult, SUCCESS};
use crate::output::{print_frames, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat, config: &MuxConfig) -> CliResult<i32> {
    let input: Box<dyn Read> = if args.input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&args.input).map_err(|err| {
            io_error(&format!("failed opening {}", args.input.display()), err)
        })?;
        Box::new(io::BufReader::new(file))
    };

    let (frames, result) = decode_all(input, config);
    debug!(frames = frames.len(), "decoded capture");
    // Frames before a decode failure are still worth seeing.
    print_frames(&frames, format);
    result.map_err(|err| protocol_error("decode failed", err))?;

    Ok(SUCCESS)
}

fn decode_all<R: Read>(input: R, config: &MuxConfig) -> (Vec<Frame>, plexmux_frame::Result<()>) {
    let mut frames = Vec::new();
    for frame in FrameReader::with_config(input, config.frame_config()) {
        match frame {
            Ok(frame) => frames.push(frame),
            Err(err) => return (frames, Err(err)),
        }
    }
    (frames, Ok(()))
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use plexmux_frame::{encode_frame, FrameKind, Origin, ProtocolError, DEFAULT_MAX_PAYLOAD};

    use super::*;

    fn capture(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn decodes_a_whole_session() {
        let bytes = capture(&[
            Frame::new_stream(0, "chat"),
            Frame::message(0, Origin::Opener, "hi"),
            Frame::message(0, Origin::Acceptor, "hello"),
            Frame::close(0, Origin::Opener),
            Frame::reset(0, Origin::Acceptor),
        ]);

        let (frames, result) = decode_all(&bytes[..], &MuxConfig::default());
        result.unwrap();
        let kinds: Vec<_> = frames.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::New,
                FrameKind::Message,
                FrameKind::Message,
                FrameKind::Close,
                FrameKind::Reset
            ]
        );
        assert_eq!(&frames[2].payload[..], b"hello");
    }

    #[test]
    fn truncated_capture_keeps_leading_frames() {
        let mut bytes = capture(&[
            Frame::new_stream(1, Bytes::new()),
            Frame::message(1, Origin::Opener, "abcdef"),
        ]);
        bytes.truncate(bytes.len() - 2);

        let (frames, result) = decode_all(&bytes[..], &MuxConfig::default());
        assert_eq!(frames.len(), 1);
        assert!(matches!(result, Err(ProtocolError::Truncated)));
    }

    #[test]
    fn configured_limit_applies() {
        let bytes = capture(&[Frame::message(2, Origin::Opener, vec![0u8; 64])]);
        let config = MuxConfig::default().with_max_message_size(16);

        let (frames, result) = decode_all(&bytes[..], &config);
        assert!(frames.is_empty());
        assert!(matches!(result, Err(ProtocolError::Oversize { size: 64, max: 16 })));
    }
}
