//! Line framing for streamed backend responses.
//!
//! Grammar, one frame per line:
//! ```text
//! frame    := content terminator?
//! content  := marker " "? payload   (event frame)
//!           | any other bytes        (passthrough frame)
//! terminator := "\n" | "\r\n"
//! ```
//! The decoder is created per response and never needs the whole body.

/// One line of the stream, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    /// False for slices of an oversized line; those are never parsed.
    pub inspect: bool,
}

/// Incremental splitter turning arbitrary chunks into frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
    max_frame_bytes: usize,
    /// Inside a line that outgrew `max_frame_bytes`.
    oversized: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame_bytes,
            oversized: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Drain the complete frames currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }

    /// Next complete frame, or a raw slice when the current line is oversized.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + pos + 1;
            let bytes: Vec<u8> = self.buf.drain(..end).collect();
            self.scanned = 0;
            let inspect = !self.oversized;
            self.oversized = false;
            return Some(Frame { bytes, inspect });
        }
        self.scanned = self.buf.len();

        let overflowing = self.buf.len() > self.max_frame_bytes;
        if !self.buf.is_empty() && (overflowing || self.oversized) {
            self.oversized = true;
            self.scanned = 0;
            return Some(Frame {
                bytes: std::mem::take(&mut self.buf),
                inspect: false,
            });
        }
        None
    }

    /// Trailing bytes after the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let inspect = !self.oversized;
        self.oversized = false;
        Some(Frame {
            bytes: std::mem::take(&mut self.buf),
            inspect,
        })
    }
}

/// Iterator over buffered frames; ends when no complete frame is left.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }
}

/// Classification of a frame's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Marker-prefixed line. `prefix` is the marker plus optional space.
    Event { prefix: &'a [u8], payload: &'a [u8] },
    Other,
}

/// Split a line into content and its terminator ("\r\n", "\n" or "").
pub fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if line.ends_with(b"\r\n") {
        line.split_at(line.len() - 2)
    } else if line.ends_with(b"\n") {
        line.split_at(line.len() - 1)
    } else {
        (line, &line[line.len()..])
    }
}

pub fn classify<'a>(content: &'a [u8], marker: &[u8]) -> FrameKind<'a> {
    if !content.starts_with(marker) {
        return FrameKind::Other;
    }
    let mut split = marker.len();
    if content.get(split) == Some(&b' ') {
        split += 1;
    }
    let (prefix, payload) = content.split_at(split);
    FrameKind::Event { prefix, payload }
}
