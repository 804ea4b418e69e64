//! Text position utilities for byte offset and line:column conversions.
//!
//! ## Coordinate Conventions
//!
//! - Lines are **1-indexed** (matching compiler line tables)
//! - Columns are **0-indexed byte offsets** within the line (matching the
//!   `col_offset` convention of Python syntax trees)
//! - Byte offsets are **0-indexed**
//!
//! [`LineIndex`] precomputes line starts once so lookups are a binary search,
//! which matters because the parser asks for a line number for every node it
//! creates.

use memchr::memchr_iter;

/// Precomputed line starts for a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    /// Byte offset of the first character of each line. Always starts with 0.
    line_starts: Vec<usize>,
    /// Total length of the indexed text in bytes.
    len: usize,
}

impl LineIndex {
    /// Build an index over `text`.
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut line_starts = Vec::with_capacity(bytes.len() / 32 + 1);
        line_starts.push(0);
        line_starts.extend(memchr_iter(b'\n', bytes).map(|i| i + 1));
        LineIndex {
            line_starts,
            len: bytes.len(),
        }
    }

    /// Number of lines. A trailing newline opens a final empty line.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Length in bytes of the indexed text.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the indexed text is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 1-indexed line containing `offset`.
    ///
    /// Offsets past the end clamp to the last line.
    pub fn line_of(&self, offset: usize) -> u32 {
        let offset = offset.min(self.len);
        let idx = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert) => insert - 1,
        };
        (idx + 1) as u32
    }

    /// 0-indexed byte column of `offset` within its line.
    pub fn col_of(&self, offset: usize) -> u32 {
        let offset = offset.min(self.len);
        let line = self.line_of(offset) as usize;
        (offset - self.line_starts[line - 1]) as u32
    }

    /// `(line, col)` for `offset`; see [`line_of`](Self::line_of) and
    /// [`col_of`](Self::col_of).
    pub fn position(&self, offset: usize) -> (u32, u32) {
        (self.line_of(offset), self.col_of(offset))
    }

    /// Byte offset where 1-indexed `line` begins, if the line exists.
    pub fn line_start(&self, line: u32) -> Option<usize> {
        if line == 0 {
            return None;
        }
        self.line_starts.get(line as usize - 1).copied()
    }

    /// Byte range of 1-indexed `line`, excluding its newline.
    pub fn line_range(&self, text: &str, line: u32) -> Option<std::ops::Range<usize>> {
        let start = self.line_start(line)?;
        let end = self
            .line_start(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.len);
        let end = if end > start && text.as_bytes().get(end - 1) == Some(&b'\r') {
            end - 1
        } else {
            end
        };
        Some(start..end)
    }

    /// Byte offset for a 1-indexed line and 0-indexed byte column.
    ///
    /// Columns past the end of the line clamp to the line end; lines past
    /// the end of the text clamp to the text length.
    pub fn offset(&self, text: &str, line: u32, col: u32) -> usize {
        match self.line_range(text, line) {
            Some(range) => (range.start + col as usize).min(range.end),
            None => self.len,
        }
    }
}

/// Extract the text of a byte range, or `None` if it is out of bounds or
/// splits a character.
pub fn extract_range(content: &str, range: std::ops::Range<usize>) -> Option<&str> {
    content.get(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let index = LineIndex::new("hello");
        assert_eq!(index.line_count(), 1);
        assert_eq!(index.position(0), (1, 0));
        assert_eq!(index.position(4), (1, 4));
        assert_eq!(index.position(99), (1, 5));
    }

    #[test]
    fn multiple_lines() {
        let text = "ab\ncd\n\nef";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.position(2), (1, 2));
        assert_eq!(index.position(3), (2, 0));
        assert_eq!(index.position(6), (3, 0));
        assert_eq!(index.position(7), (4, 0));
        assert_eq!(index.line_start(2), Some(3));
        assert_eq!(index.line_start(5), None);
        assert_eq!(index.line_start(0), None);
    }

    #[test]
    fn line_range_strips_newline_and_cr() {
        let text = "one\r\ntwo\nthree";
        let index = LineIndex::new(text);
        assert_eq!(&text[index.line_range(text, 1).unwrap()], "one");
        assert_eq!(&text[index.line_range(text, 2).unwrap()], "two");
        assert_eq!(&text[index.line_range(text, 3).unwrap()], "three");
        assert!(index.line_range(text, 4).is_none());
    }

    #[test]
    fn offset_round_trips_position() {
        let text = "x = 1\ny = foo(x)\n";
        let index = LineIndex::new(text);
        let offset = text.find("foo").unwrap();
        let (line, col) = index.position(offset);
        assert_eq!((line, col), (2, 4));
        assert_eq!(index.offset(text, line, col), offset);
        assert_eq!(index.offset(text, 2, 200), text.len() - 1);
    }

    #[test]
    fn multibyte_columns_count_bytes() {
        let text = "é = 1";
        let index = LineIndex::new(text);
        assert_eq!(index.col_of(text.find('=').unwrap()), 3);
    }

    #[test]
    fn extract_range_bounds() {
        assert_eq!(extract_range("hello", 1..3), Some("el"));
        assert_eq!(extract_range("hello", 3..9), None);
    }
}
