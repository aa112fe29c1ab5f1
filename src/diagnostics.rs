//! Human-readable compile errors for the CLI.

use colored::Colorize;
use std::fmt;

/// A compile error ready to be shown to the user.
#[derive(Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub position: Option<Position>,
}

/// An inclusive range of byte offsets into the program text.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Position {
    pub start: usize,
    pub end: usize,
}

impl Position {
    pub fn at(index: usize) -> Self {
        Position {
            start: index,
            end: index,
        }
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 1-based line and byte column of a byte offset, plus the bytes of
/// that line.
fn line_of(source: &[u8], offset: usize) -> (usize, usize, &[u8]) {
    let mut line_start = 0;
    for (line_idx, line) in source.split(|&c| c == b'\n').enumerate() {
        let line_end = line_start + line.len();
        if offset <= line_end {
            return (line_idx + 1, offset - line_start + 1, line);
        }
        line_start = line_end + 1;
    }
    (1, 1, &source[..0])
}

impl Diagnostic {
    /// Render as `file:line:col: error: message`, followed by the offending
    /// source line with the position underlined. Positions are byte
    /// offsets into `source`, which need not be valid UTF-8.
    pub fn format(&self, filename: &str, source: &[u8]) -> String {
        let level = "error".red().bold();

        let position = match self.position {
            Some(position) => position,
            None => return format!("{}: {}: {}", filename.bold(), level, self.message),
        };

        let (line_no, column, line) = line_of(source, position.start);
        let width = 1 + position.end.saturating_sub(position.start);
        let underline = format!("{}{}", " ".repeat(column - 1), "^".repeat(width));

        format!(
            "{}: {}: {}\n{}\n{}",
            format!("{}:{}:{}", filename, line_no, column).bold(),
            level,
            self.message,
            String::from_utf8_lossy(line),
            underline.green().bold(),
        )
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn debug_position() {
    assert_eq!(format!("{:?}", Position::at(3)), "3");
    assert_eq!(format!("{:?}", Position { start: 1, end: 4 }), "1-4");
}

#[test]
fn line_of_second_line() {
    assert_eq!(line_of(b"+++\n--[-", 6), (2, 3, &b"--[-"[..]));
    assert_eq!(line_of(b"[", 0), (1, 1, &b"["[..]));
}

#[test]
fn format_points_at_position() {
    colored::control::set_override(false);
    let diagnostic = Diagnostic {
        message: "unmatched `[`".to_owned(),
        position: Some(Position::at(5)),
    };
    assert_eq!(
        diagnostic.format("foo.b", b"++\n+>[<"),
        "foo.b:2:3: error: unmatched `[`\n+>[<\n  ^"
    );
}

#[test]
fn format_without_position() {
    colored::control::set_override(false);
    let diagnostic = Diagnostic {
        message: "nothing to do".to_owned(),
        position: None,
    };
    assert_eq!(diagnostic.format("foo.b", b""), "foo.b: error: nothing to do");
}

#[test]
fn format_counts_bytes_in_invalid_utf8() {
    colored::control::set_override(false);
    // Two invalid bytes before the bracket on the second line.
    let source = b"+\n\xff\xfe[";
    let diagnostic = Diagnostic {
        message: "unmatched `[`".to_owned(),
        position: Some(Position::at(4)),
    };
    assert_eq!(
        diagnostic.format("foo.b", source),
        "foo.b:2:3: error: unmatched `[`\n\u{fffd}\u{fffd}[\n  ^"
    );
}
