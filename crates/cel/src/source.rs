//! Source text and byte-offset → (line, column) mapping for diagnostics.
//!
//! Built once by the parser and shared (via [`std::rc::Rc`]) by the AST,
//! the checker's diagnostics, and the unparser.

use std::rc::Rc;

/// A one-based source location. `(0, 0)` denotes "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const UNKNOWN: Location = Location { line: 0, column: 0 };

    #[must_use]
    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Original source text plus a sorted index of line-start byte offsets.
///
/// Cheap to clone (wraps an `Rc<str>` for the text and an `Rc<[u32]>` for the
/// line table) so every pass that wants a copy can hold one without copying
/// the underlying bytes.
#[derive(Debug, Clone)]
pub struct Source {
    name: Rc<str>,
    text: Rc<str>,
    /// Byte offset of the start of each line; `line_starts[0] == 0`.
    line_starts: Rc<[u32]>,
}

impl Source {
    #[must_use]
    pub fn new(text: impl Into<String>, name: impl Into<String>) -> Self {
        let text: String = text.into();
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
            }
        }
        Self {
            name: name.into().into(),
            text: text.into(),
            line_starts: line_starts.into(),
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn code_point_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Maps a byte offset into the source text to a one-based (line, column).
    ///
    /// Column counts Unicode scalar values, not bytes, so multi-byte
    /// characters earlier on the line don't skew diagnostics.
    #[must_use]
    pub fn offset_to_location(&self, byte_offset: u32) -> Location {
        let line_idx = match self.line_starts.binary_search(&byte_offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx];
        let line_text = self.snippet_from_byte(line_start);
        let column = line_text
            .char_indices()
            .take_while(|(byte_in_line, _)| line_start + u32::try_from(*byte_in_line).unwrap_or(u32::MAX) < byte_offset)
            .count()
            + 1;
        Location {
            line: u32::try_from(line_idx + 1).unwrap_or(u32::MAX),
            column: u32::try_from(column).unwrap_or(u32::MAX),
        }
    }

    /// Returns the text of the given one-based line number, without its
    /// trailing newline.
    #[must_use]
    pub fn snippet(&self, line: u32) -> &str {
        if line == 0 {
            return "";
        }
        let idx = (line - 1) as usize;
        let Some(&start) = self.line_starts.get(idx) else {
            return "";
        };
        self.snippet_from_byte(start)
    }

    fn snippet_from_byte(&self, start: u32) -> &str {
        let start = start as usize;
        let rest = &self.text[start..];
        let end = rest.find('\n').unwrap_or(rest.len());
        &rest[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_offsets_on_first_line() {
        let src = Source::new("1 + 2", "<input>");
        assert_eq!(src.offset_to_location(0), Location { line: 1, column: 1 });
        assert_eq!(src.offset_to_location(4), Location { line: 1, column: 5 });
    }

    #[test]
    fn maps_offsets_across_lines() {
        let src = Source::new("a\nbc\nd", "<input>");
        assert_eq!(src.offset_to_location(2), Location { line: 2, column: 1 });
        assert_eq!(src.offset_to_location(5), Location { line: 3, column: 1 });
        assert_eq!(src.snippet(2), "bc");
    }

    #[test]
    fn counts_code_points_not_bytes() {
        let src = Source::new("'\u{1F600}' + 1", "<input>");
        assert_eq!(src.code_point_count(), "'\u{1F600}' + 1".chars().count());
    }
}
