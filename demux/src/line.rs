//! Reassembles complete lines from arbitrarily chunked stream reads.

/// Buffers a partial trailing line between [`feed`](Self::feed) calls.
///
/// Lines are returned without their `\n` terminator; a `\r` directly before
/// the terminator is dropped as well. Decoding happens per complete line, so
/// a multi-byte UTF-8 sequence split across reads decodes correctly. Invalid
/// UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        // The buffered partial never contains a newline, so only the new
        // chunk needs scanning.
        let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.partial.extend_from_slice(chunk);
            return Vec::new();
        };

        self.partial.extend_from_slice(&chunk[..pos]);
        let complete = std::mem::replace(&mut self.partial, chunk[pos + 1..].to_vec());

        complete.split(|&b| b == b'\n').map(finish_line).collect()
    }

    /// Return the unterminated remainder at end of stream, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.partial);
        Some(finish_line(&rest))
    }

    /// Bytes currently held waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

fn finish_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
