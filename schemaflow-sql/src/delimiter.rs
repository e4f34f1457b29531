//! Statement delimiters.

use std::borrow::Cow;
use std::fmt;

/// The text that terminates a SQL statement.
///
/// A delimiter is either matched at the end of a line (`;`) or must stand
/// alone on its own line (`GO`, or `/` after an Oracle PL/SQL block).
/// Comparison ignores ASCII case.
#[derive(Debug, Clone, Eq)]
pub struct Delimiter {
    text: Cow<'static, str>,
    alone_on_line: bool,
}

impl Delimiter {
    /// The standard `;` delimiter.
    pub const SEMICOLON: Delimiter = Delimiter::from_static(";", false);
    /// The SQL Server batch separator.
    pub const GO: Delimiter = Delimiter::from_static("GO", true);
    /// The Oracle PL/SQL block terminator.
    pub const SLASH: Delimiter = Delimiter::from_static("/", true);
    /// End of PostgreSQL `COPY ... FROM STDIN` data.
    pub const COPY_END: Delimiter = Delimiter::from_static("\\.", true);

    const fn from_static(text: &'static str, alone_on_line: bool) -> Self {
        Self {
            text: Cow::Borrowed(text),
            alone_on_line,
        }
    }

    /// Create a delimiter.
    pub fn new(text: impl Into<String>, alone_on_line: bool) -> Self {
        Self {
            text: Cow::Owned(text.into()),
            alone_on_line,
        }
    }

    /// The delimiter text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the delimiter must be the only content of its line.
    pub fn is_alone_on_line(&self) -> bool {
        self.alone_on_line
    }

    /// Check a normalized (upper-cased, whitespace-collapsed, trimmed) line
    /// of code for this delimiter.
    pub fn terminates(&self, normalized: &str) -> bool {
        let upper = self.text.to_ascii_uppercase();
        if self.alone_on_line {
            normalized == upper
        } else {
            normalized.ends_with(&upper)
        }
    }
}

impl PartialEq for Delimiter {
    fn eq(&self, other: &Self) -> bool {
        self.alone_on_line == other.alone_on_line && self.text.eq_ignore_ascii_case(&other.text)
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self::SEMICOLON
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alone_on_line {
            write!(f, "\n{}", self.text)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_equality() {
        assert_eq!(Delimiter::new("go", true), Delimiter::GO);
        assert_ne!(Delimiter::new("GO", false), Delimiter::GO);
    }

    #[test]
    fn test_terminates_end_of_line() {
        assert!(Delimiter::SEMICOLON.terminates("SELECT 1;"));
        assert!(!Delimiter::SEMICOLON.terminates("SELECT 1"));
        assert!(Delimiter::new("$$", false).terminates("END $$"));
    }

    #[test]
    fn test_terminates_alone_on_line() {
        assert!(Delimiter::GO.terminates("GO"));
        assert!(!Delimiter::GO.terminates("SELECT 1 GO"));
        assert!(Delimiter::SLASH.terminates("/"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Delimiter::SEMICOLON.to_string(), ";");
        assert_eq!(Delimiter::GO.to_string(), "\nGO");
    }
}
