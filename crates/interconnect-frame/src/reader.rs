use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use tracing::{debug, trace};

use crate::codec::{decode_buffer_with_limit, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};

/// How many maximum-size frames the rolling buffer holds.
const BUFFER_FRAMES: usize = 3;

/// Reads frames from any `Read` stream.
///
/// Bytes are read into a rolling buffer three times the maximum frame size.
/// Unconsumed bytes are moved to the front of the buffer before each read, so
/// a frame split across reads is completed in place.
pub struct FrameReader<T> {
    inner: T,
    buf: Vec<u8>,
    offset: usize,
    available: usize,
    max_frame_size: usize,
    pending: VecDeque<Frame>,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with the default maximum frame size.
    pub fn new(inner: T) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame reader with an explicit maximum frame size.
    pub fn with_max_frame_size(inner: T, max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.max(crate::codec::MIN_FRAME_SIZE);
        Self {
            inner,
            buf: vec![0u8; max_frame_size * BUFFER_FRAMES],
            offset: 0,
            available: 0,
            max_frame_size,
            pending: VecDeque::new(),
        }
    }

    /// Perform one read and return every frame it completed (possibly none).
    ///
    /// Frames already decoded but not yet handed out by [`read_frame`](Self::read_frame)
    /// are returned first without reading. Returns
    /// `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frames(&mut self) -> Result<Vec<Frame>> {
        if !self.pending.is_empty() {
            return Ok(self.pending.drain(..).collect());
        }

        self.compact();
        if self.available == self.buf.len() {
            // A partial candidate never exceeds one frame, but never stall.
            self.discard_byte();
            self.compact();
        }

        let read = loop {
            match self.inner.read(&mut self.buf[self.available..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        };
        self.available += read;
        trace!(read, buffered = self.available, "read bytes");

        self.decode()
    }

    /// Read the next frame (blocking until one is complete).
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
            let frames = self.read_frames()?;
            self.pending.extend(frames);
        }
    }

    /// Change the maximum frame size, resizing the buffer.
    ///
    /// Unconsumed bytes are preserved.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        let max_frame_size = max_frame_size.max(crate::codec::MIN_FRAME_SIZE);
        if max_frame_size == self.max_frame_size {
            return;
        }
        self.compact();
        let len = (max_frame_size * BUFFER_FRAMES).max(self.available);
        self.buf.resize(len, 0);
        self.buf.shrink_to_fit();
        debug!(
            from = self.max_frame_size,
            to = max_frame_size,
            "frame reader resized"
        );
        self.max_frame_size = max_frame_size;
    }

    /// Current maximum frame size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Number of bytes read but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.available
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn decode(&mut self) -> Result<Vec<Frame>> {
        let decoded =
            decode_buffer_with_limit(&self.buf, self.offset, self.available, self.max_frame_size)?;
        self.offset = decoded.offset;
        self.available = decoded.available;
        Ok(decoded.frames)
    }

    fn compact(&mut self) {
        if self.offset > 0 {
            self.buf
                .copy_within(self.offset..self.offset + self.available, 0);
            self.offset = 0;
        }
    }

    fn discard_byte(&mut self) {
        self.offset += 1;
        self.available -= 1;
        if self.available == 0 {
            self.offset = 0;
        }
    }
}

impl<T> std::fmt::Debug for FrameReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("max_frame_size", &self.max_frame_size)
            .field("buffered", &self.available)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, FrameType, MAGIC};

    fn wire_of(frames: &[Frame]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for frame in frames {
            frame.encode(&mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let frame = Frame::message(FrameType::MessageSend, 1, 2, "hello");
        let mut reader = FrameReader::new(Cursor::new(wire_of(&[frame.clone()])));

        assert_eq!(reader.read_frames().unwrap(), vec![frame]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn read_multiple_frames_in_one_read() {
        let frames = vec![
            Frame::connection(FrameType::ConnectionOpen, ""),
            Frame::session(FrameType::SessionStart, 4, "one"),
            Frame::message(FrameType::MessageAccept, 4, 6, "two"),
        ];
        let mut reader = FrameReader::new(Cursor::new(wire_of(&frames)));

        assert_eq!(reader.read_frames().unwrap(), frames);
    }

    #[test]
    fn partial_read_handling() {
        let frame = Frame::session(FrameType::SessionAccept, 3, "slow");
        let byte_reader = ByteByByteReader {
            bytes: wire_of(&[frame.clone()]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn read_frame_hands_out_queued_frames_in_order() {
        let frames: Vec<Frame> = (0..4)
            .map(|i| Frame::message(FrameType::MessageSend, 0, i, format!("m{i}")))
            .collect();
        let mut reader = FrameReader::new(Cursor::new(wire_of(&frames)));

        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frames().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let wire = wire_of(&[Frame::session(FrameType::SessionStart, 1, "only-part")]);
        let mut reader = FrameReader::new(Cursor::new(wire[..wire.len() - 3].to_vec()));

        assert!(reader.read_frames().unwrap().is_empty());
        assert!(matches!(
            reader.read_frames().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn noise_between_frames_is_skipped() {
        let first = Frame::message(FrameType::MessageSend, 2, 0, "a");
        let second = Frame::message(FrameType::MessageReject, 2, 0, "b");
        let mut wire = wire_of(&[first.clone()]);
        wire.extend_from_slice(b"\xde\xad\xbe\xefINTE");
        wire.extend_from_slice(&wire_of(&[second.clone()]));

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap(), first);
        assert_eq!(reader.read_frame().unwrap(), second);
    }

    #[test]
    fn impossible_length_does_not_stall() {
        let max = 64;
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u32_le(1_000_000);
        wire.put_slice(&[0u8; 80]);
        let frame = Frame::connection(FrameType::ConnectionClose, "");
        frame.encode(&mut wire).unwrap();

        let mut reader = FrameReader::with_max_frame_size(Cursor::new(wire.to_vec()), max);
        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn corrupted_length_releases_following_frame() {
        let mut wire = BytesMut::new();
        Frame::message(FrameType::MessageSend, 0, 0, "lost").encode(&mut wire).unwrap();
        wire[6..10].copy_from_slice(&100_000u32.to_le_bytes());
        let second = Frame::message(FrameType::MessageAccept, 0, 0, "kept");
        second.encode(&mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_frames().unwrap(), vec![second]);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn frames_split_across_buffer_refills() {
        let max = 64;
        let frames: Vec<Frame> = (0..40)
            .map(|i| Frame::message(FrameType::MessageSend, 1, i, vec![i as u8; 20]))
            .collect();
        let chunked = ChunkedReader {
            bytes: wire_of(&frames),
            pos: 0,
            chunk: 37,
        };
        let mut reader = FrameReader::with_max_frame_size(chunked, max);

        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
    }

    #[test]
    fn set_max_frame_size_preserves_partial_frame() {
        let frame = Frame::session(FrameType::SessionStart, 9, vec![7u8; 30]);
        let wire = wire_of(&[frame.clone()]);
        let chunked = ChunkedReader {
            bytes: wire,
            pos: 0,
            chunk: 20,
        };
        let mut reader = FrameReader::new(chunked);

        assert!(reader.read_frames().unwrap().is_empty());
        assert_eq!(reader.buffered(), 20);

        reader.set_max_frame_size(256);
        assert_eq!(reader.max_frame_size(), 256);
        assert_eq!(reader.buffered(), 20);
        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(FrameType::ConnectionOpen, 0, 0, b"", &mut wire).unwrap();

        let reader = InterruptedThenData {
            interrupted: false,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.kind, FrameType::ConnectionOpen);
    }

    #[test]
    fn read_error_propagates() {
        let mut framed = FrameReader::new(FailingReader);
        let err = framed.read_frames().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let frame = Frame::message(FrameType::MessageSend, 0, 2, "ping");
        writer.write_frame(&frame).unwrap();
        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert!(format!("{reader:?}").contains("FrameReader"));
        let _inner = reader.into_inner();
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct ChunkedReader {
        bytes: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len()).min(self.chunk);
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::ConnectionReset))
        }
    }
}
