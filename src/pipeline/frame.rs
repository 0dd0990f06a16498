//! Newline framing over an unframed byte stream.
//!
//! Bytes are pushed as they arrive from the transport and complete frames are pulled
//! back out one at a time. A frame split across reads is re-assembled, so the frame
//! sequence never depends on how the stream was chunked.

/// One newline-delimited unit of the wire protocol, delimiter excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
    oversized: bool,
}

impl RawFrame {
    /// A complete frame holding `bytes`.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            oversized: false,
        }
    }

    fn oversized() -> Self {
        Self {
            bytes: Vec::new(),
            oversized: true,
        }
    }

    /// Frame payload. Empty for an oversized frame, whose bytes were discarded.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the line exceeded the decoder's length cap.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }
}

/// Accumulates raw bytes and extracts newline-terminated frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: Option<usize>,
    // Set while skipping the tail of a line that already blew the cap
    discarding: bool,
}

impl FrameDecoder {
    /// Decoder with an unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that caps frame length; longer lines come out as oversized frames.
    pub fn with_max_frame_len(max_frame_len: Option<usize>) -> Self {
        Self {
            buffer: Vec::with_capacity(max_frame_len.unwrap_or(1024).min(4096)),
            max_frame_len,
            discarding: false,
        }
    }

    /// Append a chunk read from the transport.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the first complete frame, if a newline has arrived.
    pub fn try_extract_frame(&mut self) -> Option<RawFrame> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();

                if self.discarding {
                    self.discarding = false;
                    return Some(RawFrame::oversized());
                }
                if self.exceeds_cap(line.len()) {
                    return Some(RawFrame::oversized());
                }
                Some(RawFrame::new(line))
            }
            None => {
                // No newline yet. Drop the partial line early once it can no
                // longer fit, and remember to swallow the rest of it.
                if self.exceeds_cap(self.buffer.len()) {
                    self.buffer.clear();
                    self.discarding = true;
                }
                None
            }
        }
    }

    /// Bytes currently held without a terminating newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn exceeds_cap(&self, len: usize) -> bool {
        self.max_frame_len.is_some_and(|max| len > max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<RawFrame> {
        std::iter::from_fn(|| decoder.try_extract_frame()).collect()
    }

    fn decode_in_chunks(stream: &[u8], chunk: usize, cap: Option<usize>) -> Vec<RawFrame> {
        let mut decoder = FrameDecoder::with_max_frame_len(cap);
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            decoder.push_bytes(piece);
            frames.extend(drain(&mut decoder));
        }
        frames
    }

    #[test]
    fn extracts_frames_without_delimiters() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(b"0.125\n0.250\n");
        let frames = drain(&mut decoder);
        assert_eq!(frames, vec![RawFrame::new("0.125"), RawFrame::new("0.250")]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn returns_none_until_newline_arrives() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(b"0.12");
        assert!(decoder.try_extract_frame().is_none());
        decoder.push_bytes(b"5\n0.3");
        assert_eq!(decoder.try_extract_frame(), Some(RawFrame::new("0.125")));
        assert!(decoder.try_extract_frame().is_none());
        assert_eq!(decoder.buffered_len(), 3);
    }

    #[test]
    fn empty_line_is_an_empty_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(b"\n\n");
        assert_eq!(drain(&mut decoder), vec![RawFrame::new(""), RawFrame::new("")]);
    }

    #[test]
    fn chunking_never_loses_or_merges_frames() {
        let stream = b"0.1\nUSB_LOGGING_ENABLED\n\xff\xfe\n\n1e-3\n-0.5\r\n0.000123\npartial";
        let whole = decode_in_chunks(stream, stream.len(), None);
        assert_eq!(whole.len(), 7);
        for chunk in 1..stream.len() {
            assert_eq!(
                decode_in_chunks(stream, chunk, None),
                whole,
                "chunk size {chunk}"
            );
        }
    }

    #[test]
    fn oversized_lines_are_flagged_regardless_of_chunking() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"0.1\n");
        stream.extend(std::iter::repeat(b'9').take(40));
        stream.extend_from_slice(b"\n0.2\n");

        let whole = decode_in_chunks(&stream, stream.len(), Some(16));
        assert_eq!(whole.len(), 3);
        assert_eq!(whole[0], RawFrame::new("0.1"));
        assert!(whole[1].is_oversized());
        assert_eq!(whole[2], RawFrame::new("0.2"));

        for chunk in 1..stream.len() {
            assert_eq!(decode_in_chunks(&stream, chunk, Some(16)), whole);
        }
    }

    #[test]
    fn cap_bounds_buffer_growth() {
        let mut decoder = FrameDecoder::with_max_frame_len(Some(8));
        for _ in 0..100 {
            decoder.push_bytes(b"0123456789");
            assert!(decoder.try_extract_frame().is_none());
            assert!(decoder.buffered_len() <= 10);
        }
        decoder.push_bytes(b"\n0.5\n");
        assert!(decoder.try_extract_frame().is_some_and(|f| f.is_oversized()));
        assert_eq!(decoder.try_extract_frame(), Some(RawFrame::new("0.5")));
    }
}
