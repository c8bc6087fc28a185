//! Wire-stream line filter.
//!
//! The wire stream carries exactly one JSON document per line, so no
//! reconstruction happens here: a line either is a unit or is dropped.

use crate::types::{StreamKind, Unit};

/// Forward `line` as a unit iff it starts with `{`.
#[must_use]
pub fn classify(line: String) -> Option<Unit> {
    if line.starts_with('{') {
        Some(Unit::new(StreamKind::Wire, line))
    } else {
        tracing::trace!(len = line.len(), "Dropping non-JSON wire line");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_object_lines_verbatim() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":null}"#.to_string();
        let unit = classify(line.clone()).unwrap();
        assert_eq!(unit.text(), line);
        assert_eq!(unit.origin(), StreamKind::Wire);
    }

    #[test]
    fn drops_everything_else() {
        for line in [
            "Content-Length: 52",
            "",
            " {\"indented\":true}",
            "[1,2,3]",
            "plain text",
        ] {
            assert!(classify(line.to_string()).is_none(), "{line:?}");
        }
    }

    #[test]
    fn unbalanced_object_line_is_still_forwarded() {
        // One line per message by protocol; balance is not checked here.
        assert!(classify("{\"partial\":".to_string()).is_some());
    }
}
