use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::ProtocolError;

/// tokio-util codec for mplex frames.
///
/// Pair with `FramedRead`/`FramedWrite` over any async byte stream. Decoding
/// is restartable across arbitrary read boundaries; a stream that ends inside
/// a frame yields [`ProtocolError::Truncated`].
#[derive(Debug, Clone, Default)]
pub struct PlexCodec {
    config: FrameConfig,
}

impl PlexCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for PlexCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated),
        }
    }
}

impl Encoder<Frame> for PlexCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_frame(&item, dst, self.config.max_payload_size)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::Origin;

    #[tokio::test]
    async fn framed_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, PlexCodec::default());
        let mut stream = FramedRead::new(server, PlexCodec::default());

        let frames = vec![
            Frame::new_stream(1, Bytes::new()),
            Frame::message(1, Origin::Opener, Bytes::from(vec![7u8; 500])),
            Frame::close(1, Origin::Opener),
        ];
        let sent = frames.clone();
        let writer = tokio::spawn(async move {
            for frame in sent {
                sink.send(frame).await.unwrap();
            }
        });

        for expected in frames {
            let frame = stream.next().await.unwrap().unwrap();
            assert_eq!(frame, expected);
        }
        writer.await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_truncated() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, PlexCodec::default());

        client.write_all(&[0x09, 0x05, b'h', b'e']).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[tokio::test]
    async fn encoder_enforces_configured_limit() {
        let (client, _server) = tokio::io::duplex(64);
        let codec = PlexCodec::new(FrameConfig::default().with_max_payload_size(4));
        assert_eq!(codec.config().max_payload_size, 4);
        let mut sink = FramedWrite::new(client, codec);

        let err = sink
            .send(Frame::message(0, Origin::Acceptor, Bytes::from_static(b"too long")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Oversize { size: 8, max: 4 }));
    }
}
