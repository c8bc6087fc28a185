//! Reconstruction of JSON payloads embedded in diagnostics log text.
//!
//! Loggers on the diagnostics stream print records like
//!
//! ```text
//! [INFO  spice_lsp::server] initialize params: {
//!   "processId": 4242,
//!   "capabilities": {}
//! }
//! ```
//!
//! A record that opens a payload starts a buffer; following lines without a
//! record marker are appended to it; the buffer is emitted once its `[`/`]`
//! and `{`/`}` counts both return to zero. Records without a payload, and
//! stray lines outside a payload, pass through untouched.
//!
//! A new payload-bearing record always replaces an unfinished buffer. The
//! partial text is dropped, never emitted.

use regex::Regex;
use serde::Deserialize;

/// Default record marker: env_logger style `[LEVEL target]`, optionally with
/// a timestamp before the level.
pub const DEFAULT_RECORD_MARKER: &str =
    r"^\[(?:\S+\s+)?(?:TRACE|DEBUG|INFO|WARN|ERROR)\s+[^\]\s]+\]";

#[derive(Debug, thiserror::Error)]
#[error("invalid record marker pattern `{pattern}`")]
pub struct PatternError {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// How bracket characters are counted when checking payload balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Count every bracket character, including those inside string literals.
    #[default]
    Textual,
    /// Skip brackets inside double-quoted strings (backslash escapes honoured).
    StringAware,
}

/// Textual markers that classify a diagnostics line.
#[derive(Debug, Clone)]
pub struct RecordMarkers {
    marker: Regex,
    /// Category tags, one of which must appear inside the marker.
    /// Empty accepts any tag.
    categories: Vec<String>,
    /// Substrings after the marker that announce a payload.
    payload_keywords: Vec<String>,
}

impl RecordMarkers {
    pub fn new(
        marker: &str,
        categories: Vec<String>,
        payload_keywords: Vec<String>,
    ) -> Result<Self, PatternError> {
        let marker = Regex::new(marker).map_err(|source| PatternError {
            pattern: marker.to_string(),
            source,
        })?;
        Ok(Self {
            marker,
            categories,
            payload_keywords,
        })
    }

    fn classify(&self, line: &str) -> LineClass {
        let Some(found) = self.marker.find(line) else {
            return LineClass::Plain;
        };
        if found.start() != 0 {
            return LineClass::Plain;
        }
        let tag = found.as_str();
        if !self.categories.is_empty() && !self.categories.iter().any(|c| tag.contains(c.as_str()))
        {
            return LineClass::Plain;
        }

        let message = &line[found.end()..];
        let has_payload = message.contains(['{', '['])
            || self
                .payload_keywords
                .iter()
                .any(|k| message.contains(k.as_str()));
        if has_payload {
            LineClass::PayloadRecord
        } else {
            LineClass::Record
        }
    }
}

impl Default for RecordMarkers {
    fn default() -> Self {
        Self {
            marker: Regex::new(DEFAULT_RECORD_MARKER).expect("default record marker is valid"),
            categories: Vec::new(),
            payload_keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineClass {
    /// No record marker (or an unrecognised category).
    Plain,
    /// Record marker, no payload indicator.
    Record,
    /// Record marker and a payload indicator.
    PayloadRecord,
}

#[derive(Debug, Clone, Default)]
pub struct AccumulatorOptions {
    pub scan: ScanMode,
    /// Drop an unfinished payload once its buffer exceeds this many bytes.
    pub max_buffer_bytes: Option<usize>,
}

/// Net count of unmatched opening brackets and braces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub brackets: i64,
    pub braces: i64,
}

impl Balance {
    /// Scan all of `text`. Counts can go negative when closers outnumber
    /// openers; only an exact zero counts as balanced.
    #[must_use]
    pub fn scan(text: &str, mode: ScanMode) -> Self {
        let mut balance = Self::default();
        let mut in_string = false;
        let mut escaped = false;

        for &b in text.as_bytes() {
            if mode == ScanMode::StringAware {
                if in_string {
                    match (escaped, b) {
                        (true, _) => escaped = false,
                        (false, b'\\') => escaped = true,
                        (false, b'"') => in_string = false,
                        _ => {}
                    }
                    continue;
                }
                if b == b'"' {
                    in_string = true;
                    continue;
                }
            }

            match b {
                b'[' => balance.brackets += 1,
                b']' => balance.brackets -= 1,
                b'{' => balance.braces += 1,
                b'}' => balance.braces -= 1,
                _ => {}
            }
        }
        balance
    }

    #[must_use]
    pub fn is_balanced(self) -> bool {
        self.brackets == 0 && self.braces == 0
    }
}

/// Result of feeding one line to the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitted {
    /// A line forwarded as-is.
    Passthrough(String),
    /// A balanced payload, possibly joined from several lines.
    Completed(String),
}

impl Emitted {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Passthrough(text) | Self::Completed(text) => text,
        }
    }

    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Passthrough(text) | Self::Completed(text) => text,
        }
    }
}

/// Per-stream reconstruction state. Idle when the buffer is empty.
#[derive(Debug, Default)]
pub struct DiagnosticsAccumulator {
    markers: RecordMarkers,
    options: AccumulatorOptions,
    buffer: String,
    balance: Balance,
}

impl DiagnosticsAccumulator {
    #[must_use]
    pub fn new(markers: RecordMarkers, options: AccumulatorOptions) -> Self {
        Self {
            markers,
            options,
            buffer: String::new(),
            balance: Balance::default(),
        }
    }

    /// Feed one diagnostics line; returns what, if anything, should be routed.
    pub fn push_line(&mut self, line: String) -> Option<Emitted> {
        match self.markers.classify(&line) {
            LineClass::PayloadRecord => {
                if !self.buffer.is_empty() {
                    tracing::debug!(
                        discarded_bytes = self.buffer.len(),
                        "New record replaces unfinished payload"
                    );
                }
                self.buffer = line;
            }
            LineClass::Plain if self.is_accumulating() => {
                let content = line.trim();
                if content.is_empty() {
                    return None;
                }
                self.buffer.push(' ');
                self.buffer.push_str(content);
            }
            // Idle, or a payload-less record in the middle of a payload.
            LineClass::Plain | LineClass::Record => return Some(Emitted::Passthrough(line)),
        }

        self.after_append()
    }

    fn after_append(&mut self) -> Option<Emitted> {
        self.balance = Balance::scan(&self.buffer, self.options.scan);
        if self.balance.is_balanced() && !self.buffer.is_empty() {
            let unit = std::mem::take(&mut self.buffer);
            self.reset();
            return Some(Emitted::Completed(unit));
        }

        // The cap only applies to payloads that are still open.
        if let Some(limit) = self.options.max_buffer_bytes
            && self.buffer.len() > limit
        {
            tracing::warn!(
                buffered_bytes = self.buffer.len(),
                limit,
                "Dropping unterminated diagnostics payload"
            );
            self.reset();
        }
        None
    }

    /// Drop any unfinished payload, e.g. at end of stream. Returns the number
    /// of bytes discarded.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            tracing::debug!(
                discarded_bytes = discarded,
                "Discarding unterminated diagnostics payload"
            );
        }
        self.reset();
        discarded
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.balance = Balance::default();
    }

    #[must_use]
    pub fn is_accumulating(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Text of the payload under reconstruction (empty when idle).
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Balance of the current buffer as of the last append.
    #[must_use]
    pub fn balance(&self) -> Balance {
        self.balance
    }
}
