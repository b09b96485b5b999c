//! Demultiplexer for interleaved exec output.
//!
//! The engine-side stream interleaves stdout and stderr as self-describing
//! frames: a stream-kind tag byte, three reserved zero bytes, a big-endian
//! u32 payload length, then the payload. Frame boundaries never align with
//! transport reads, so decoding buffers partial frames and resynchronizes.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Frame header length: tag byte + three reserved bytes + u32 length.
pub const HEADER_LEN: usize = 8;

/// Hard cap on a single frame payload. Anything larger is treated as stream
/// corruption rather than buffered indefinitely.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Demultiplexing failure. Terminates the pump for the affected session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DemuxError {
    #[error("invalid stream tag byte: {0:#04x}")]
    InvalidTag(u8),
    #[error("frame payload of {0} bytes exceeds the {MAX_FRAME_LEN} byte cap")]
    FrameTooLarge(usize),
}

/// Which channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One demultiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub data: Bytes,
}

/// Stateful, buffering frame decoder.
///
/// Feed transport reads with [`extend`](Self::extend) and drain complete
/// frames with [`next_frame`](Self::next_frame). The decoded frame sequence
/// is independent of how the input was chunked.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` while a frame is still partial.
    ///
    /// # Errors
    /// Returns [`DemuxError`] on an unknown tag byte or an oversized frame;
    /// the stream cannot be resynchronized after either.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DemuxError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let tag = self.buf[0];
        let kind = StreamKind::from_tag(tag).ok_or(DemuxError::InvalidTag(tag))?;
        let len =
            u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(DemuxError::FrameTooLarge(len));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let data = self.buf.split_to(len).freeze();
        Ok(Some(Frame { kind, data }))
    }
}

/// Encode a frame in the wire format. Used by engine adapters and tests.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(kind: StreamKind, data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_FRAME_LEN);
    let mut out = Vec::with_capacity(HEADER_LEN + data.len());
    out.push(kind.tag());
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decodes_interleaved_frames() {
        let mut wire = encode_frame(StreamKind::Stdout, b"hello");
        wire.extend_from_slice(&encode_frame(StreamKind::Stderr, b"oops"));
        wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b"world"));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&wire);
        let frames = drain(&mut decoder);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind, StreamKind::Stdout);
        assert_eq!(&frames[0].data[..], b"hello");
        assert_eq!(frames[1].kind, StreamKind::Stderr);
        assert_eq!(&frames[1].data[..], b"oops");
        assert_eq!(&frames[2].data[..], b"world");
    }

    #[test]
    fn decoding_is_chunking_invariant() {
        let mut wire = encode_frame(StreamKind::Stdout, b"the quick brown fox");
        wire.extend_from_slice(&encode_frame(StreamKind::Stderr, b"jumps"));
        wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b""));
        wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b"over the lazy dog"));

        let mut reference = FrameDecoder::new();
        reference.extend(&wire);
        let expected = drain(&mut reference);

        // Split the byte sequence at every possible boundary.
        for split in 0..=wire.len() {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&wire[..split]);
            let mut frames = drain(&mut decoder);
            decoder.extend(&wire[split..]);
            frames.extend(drain(&mut decoder));
            assert_eq!(frames, expected, "split at {split}");
        }

        // Byte-at-a-time feeding yields the same sequence too.
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &wire {
            decoder.extend(std::slice::from_ref(byte));
            frames.extend(drain(&mut decoder));
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn partial_header_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[1, 0, 0]);
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn invalid_tag_is_an_error() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[7, 0, 0, 0, 0, 0, 0, 1, b'x']);
        assert_eq!(decoder.next_frame(), Err(DemuxError::InvalidTag(7)));
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut decoder = FrameDecoder::new();
        let mut header = vec![1, 0, 0, 0];
        header.extend_from_slice(&u32::MAX.to_be_bytes());
        decoder.extend(&header);
        assert!(matches!(
            decoder.next_frame(),
            Err(DemuxError::FrameTooLarge(_))
        ));
    }
}
