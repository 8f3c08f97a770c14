//! Streaming framer for the modem's command channel
//!
//! The channel carries two kinds of traffic: newline-terminated command lines
//! and, after `AT+CIPSEND`, exactly N opaque payload bytes. [`LineCodec`] owns
//! that two-state switch so every transport adapter frames input the same way.

/// Longest command line kept before the buffer is discarded
pub const MAX_LINE_LEN: usize = 1024;

/// A unit of input extracted from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A trimmed, non-empty command line
    Line(String),
    /// A complete raw payload
    Raw(Vec<u8>),
}

/// Line/raw framer with partial-data buffering
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
    raw_expected: Option<usize>,
}

impl LineCodec {
    /// Create a codec in line mode
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            raw_expected: None,
        }
    }

    /// Append bytes received from the transport
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Switch to raw mode: the next `len` bytes form one [`Frame::Raw`]
    ///
    /// Bytes already buffered count toward the payload.
    pub fn begin_raw(&mut self, len: usize) {
        self.raw_expected = Some(len);
    }

    /// Abandon a raw capture, dropping the partial payload
    ///
    /// Returns the number of bytes discarded.
    pub fn cancel_raw(&mut self) -> usize {
        match self.raw_expected.take() {
            Some(expected) => {
                let dropped = self.buffer.len().min(expected);
                self.buffer.drain(..dropped);
                dropped
            }
            None => 0,
        }
    }

    /// True while a raw payload is being collected
    pub fn is_raw(&self) -> bool {
        self.raw_expected.is_some()
    }

    /// Payload bytes still missing in raw mode
    pub fn raw_remaining(&self) -> usize {
        self.raw_expected
            .map(|n| n.saturating_sub(self.buffer.len()))
            .unwrap_or(0)
    }

    /// Extract the next complete frame, if any
    pub fn next_frame(&mut self) -> Option<Frame> {
        if let Some(expected) = self.raw_expected {
            if self.buffer.len() < expected {
                return None;
            }
            self.raw_expected = None;
            let payload: Vec<u8> = self.buffer.drain(..expected).collect();
            return Some(Frame::Raw(payload));
        }

        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LEN {
                    tracing::warn!(
                        "Discarding {} bytes of unterminated input",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                return None;
            };

            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            if line_bytes.len() > MAX_LINE_LEN {
                tracing::warn!("Dropping oversized command line ({} bytes)", line_bytes.len());
                continue;
            }

            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim();
            if !line.is_empty() {
                return Some(Frame::Line(line.to_string()));
            }
        }
    }

    /// Drop buffered input and return to line mode
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.raw_expected = None;
    }
}
