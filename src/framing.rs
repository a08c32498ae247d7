//! Newline framing.

/// Inbound accumulator that reassembles `\n`-terminated lines from arbitrary
/// read boundaries.
///
/// The buffer grows as needed; a line longer than any single read is kept
/// until its terminator arrives. Popped lines only advance a cursor, the
/// consumed prefix is reclaimed in bulk once it outweighs the live bytes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    // bytes before this offset have been handed out
    consumed: usize,
    // bytes before this offset are known to contain no terminator
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Exposes the tail of the accumulator for decoders that append in place.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        self.compact();
        &mut self.buf
    }

    /// Pops the next complete line, without its terminator.
    ///
    /// One trailing `\r` is stripped. Invalid UTF-8 is replaced.
    pub fn next_line(&mut self) -> Option<String> {
        let offset = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
        let Some(offset) = offset else {
            self.scanned = self.buf.len();
            return None;
        };

        let end = self.scanned + offset;
        let mut line = &self.buf[self.consumed..end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        let line = String::from_utf8_lossy(line).into_owned();

        self.consumed = end + 1;
        self.scanned = self.consumed;
        if self.consumed == self.buf.len() {
            self.clear();
        }
        Some(line)
    }

    /// Bytes of an incomplete trailing line.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.consumed
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.consumed = 0;
        self.scanned = 0;
    }

    // amortized: the prefix is only moved once it is at least half the buffer
    fn compact(&mut self) {
        if self.consumed == 0 || self.consumed < self.buf.len() / 2 {
            return;
        }
        self.buf.drain(..self.consumed);
        self.scanned -= self.consumed;
        self.consumed = 0;
    }
}
