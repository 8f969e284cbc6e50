//! `tokio_util::codec` integration.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{scan, Frame, Scan, DEFAULT_MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use crate::error::FrameError;

/// Frame codec for use with `FramedRead`/`FramedWrite`.
///
/// Applies the same resynchronization rules as
/// [`decode_buffer`](crate::decode_buffer).
#[derive(Debug, Clone)]
pub struct InterconnectCodec {
    max_frame_size: usize,
}

impl InterconnectCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.max(MIN_FRAME_SIZE),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size.max(MIN_FRAME_SIZE);
    }
}

impl Default for InterconnectCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for InterconnectCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if src.is_empty() {
                return Ok(None);
            }
            match scan(&src[..], self.max_frame_size) {
                Scan::Frame(frame, len) => {
                    src.advance(len);
                    return Ok(Some(frame));
                }
                Scan::Skip(len) => src.advance(len),
                Scan::Incomplete => {
                    src.reserve(MIN_FRAME_SIZE);
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Frame> for InterconnectCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let size = frame.wire_size();
        if size > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        frame.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::FrameType;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, InterconnectCodec::new());
        let mut stream = FramedRead::new(server, InterconnectCodec::new());

        let frames = vec![
            Frame::connection(FrameType::ConnectionStart, "{}"),
            Frame::session(FrameType::SessionStart, 0, "name"),
            Frame::message(FrameType::MessageSend, 0, 2, vec![9u8; 300]),
        ];
        for frame in frames.clone() {
            sink.send(frame).await.unwrap();
        }
        drop(sink);

        let mut received = Vec::new();
        while let Some(frame) = stream.next().await {
            received.push(frame.unwrap());
        }
        assert_eq!(received, frames);
    }

    #[tokio::test]
    async fn resynchronizes_after_noise() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = FramedRead::new(server, InterconnectCodec::new());

        let frame = Frame::message(FrameType::MessageAccept, 1, 1, "ok");
        let mut wire = BytesMut::from(&b"garbage-INTER"[..]);
        frame.encode(&mut wire).unwrap();
        client.write_all(&wire).await.unwrap();
        drop(client);

        assert_eq!(stream.next().await.unwrap().unwrap(), frame);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn decode_waits_for_partial_frame() {
        let frame = Frame::session(FrameType::SessionOpen, 3, "");
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();

        let mut codec = InterconnectCodec::new();
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), wire.len() - 1);

        partial.extend_from_slice(&wire[wire.len() - 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(frame));
        assert!(partial.is_empty());
    }

    #[test]
    fn decode_skips_corrupted_length() {
        let mut wire = BytesMut::new();
        Frame::session(FrameType::SessionOpen, 1, "").encode(&mut wire).unwrap();
        wire[6..10].copy_from_slice(&100_000u32.to_le_bytes());
        let frame = Frame::session(FrameType::SessionClose, 1, "");
        frame.encode(&mut wire).unwrap();

        let mut codec = InterconnectCodec::new();
        assert_eq!(codec.decode(&mut wire).unwrap(), Some(frame));
        assert!(wire.is_empty());
    }

    #[test]
    fn encode_rejects_oversized_frame() {
        let mut codec = InterconnectCodec::with_max_frame_size(32);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(
                Frame::message(FrameType::MessageSend, 0, 0, vec![0u8; 64]),
                &mut dst,
            )
            .unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
        assert!(dst.is_empty());
    }
}
