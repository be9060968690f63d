//! Line framing for the client byte stream.
//!
//! Clients speak a newline-delimited text protocol over TCP. A read can end
//! anywhere: mid-line, between lines, or after several lines at once.
//! [`LineFramer`] buffers the stream per connection and hands out complete
//! lines, delimiter stripped, in arrival order.
//!
//! ```text
//! feed("$PCONTROL,fan,1\r\n$SMS")  -> ["$PCONTROL,fan,1"]   remainder "$SMS"
//! feed("SEND,7,+351,hi,30\r\n")    -> ["$SMSSEND,7,+351,hi,30"]
//! ```
//!
//! The buffer is unbounded unless a maximum line length is configured. A
//! peer that never sends the delimiter grows it without limit. With the cap
//! set, any line longer than the limit is dropped whole: the framer discards
//! bytes up to and including the next delimiter, however the line was split
//! across reads, and resumes with the line after it.

/// Incremental line decoder that handles partial reads.
///
/// Feed bytes via [`LineFramer::feed`] and iterate the returned [`Lines`].
/// Incomplete data stays buffered for the next call.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Offset of the first byte not yet emitted as part of a line.
    start: usize,
    delimiter: Vec<u8>,
    max_line_length: Option<usize>,
    /// Inside an oversized line; drop bytes until the next delimiter.
    discarding: bool,
}

impl LineFramer {
    /// Create a framer splitting on `delimiter`.
    ///
    /// An empty delimiter never matches, so such a framer only buffers.
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            delimiter: delimiter.into(),
            max_line_length: None,
            discarding: false,
        }
    }

    /// Drop lines longer than `limit` bytes, delimiter excluded.
    pub fn with_max_line_length(mut self, limit: Option<usize>) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Append `bytes` and return an iterator over every line now complete.
    ///
    /// The iterator is finite and borrows the framer. Lines it has not yet
    /// yielded when dropped are kept and come out first on the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Lines<'_> {
        self.compact();
        self.buf.extend_from_slice(bytes);
        Lines { framer: self }
    }

    /// Configured delimiter.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// Number of buffered bytes not yet emitted.
    pub fn pending_len(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Returns true if the framer has buffered partial data.
    pub fn has_partial(&self) -> bool {
        self.pending_len() > 0
    }

    /// Whether the framer is skipping the rest of an oversized line.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Drop the emitted prefix of the buffer.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let dlen = self.delimiter.len();
        if dlen == 0 {
            return None;
        }
        loop {
            let pending = &self.buf[self.start..];
            let pos = pending
                .windows(dlen)
                .position(|window| window == self.delimiter.as_slice())?;
            let line_start = self.start;
            self.start += pos + dlen;

            if self.discarding {
                self.discarding = false;
                log::debug!("[Framer] Resynchronized after oversized line");
                continue;
            }
            if self.max_line_length.is_some_and(|limit| pos > limit) {
                log::warn!("[Framer] Dropping {} byte line (limit exceeded)", pos);
                continue;
            }
            return Some(self.buf[line_start..line_start + pos].to_vec());
        }
    }

    /// Length of the longest buffered suffix that could begin a delimiter.
    fn partial_delimiter_len(&self) -> usize {
        let pending = &self.buf[self.start..];
        (1..self.delimiter.len())
            .rev()
            .find(|&k| pending.ends_with(&self.delimiter[..k]))
            .unwrap_or(0)
    }

    /// Drop the undelimited remainder, keeping a possible delimiter prefix.
    fn drop_pending(&mut self) {
        let keep = self.partial_delimiter_len();
        let from = self.buf.len() - keep;
        self.buf.drain(..from);
        self.start = 0;
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.max_line_length else {
            return;
        };
        if self.discarding {
            self.drop_pending();
            return;
        }
        let body = self.pending_len() - self.partial_delimiter_len();
        if body > limit {
            log::warn!(
                "[Framer] Discarding line over {} bytes until next delimiter",
                limit
            );
            self.discarding = true;
            self.drop_pending();
        }
    }
}

/// Complete lines produced by one [`LineFramer::feed`] call.
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.framer.next_line();
        if line.is_none() {
            self.framer.enforce_limit();
        }
        line
    }
}

/// Encode `line` for the wire by appending `delimiter`.
pub fn terminate(line: &str, delimiter: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + delimiter.len());
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(delimiter);
    out
}
