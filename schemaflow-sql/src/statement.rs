//! Parsed SQL statements.

use std::fmt;

use crate::delimiter::Delimiter;

/// How a statement must be sent to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementKind {
    /// A regular statement.
    #[default]
    Standard,
    /// A PostgreSQL `COPY ... FROM STDIN` statement. The first line is the
    /// command, the remaining lines are the data stream.
    CopyFromStdin,
}

/// A single executable statement extracted from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// First physical line of the statement, 1-based.
    pub line_number: usize,
    /// Statement text with the delimiter stripped.
    pub sql: String,
    /// Delimiter that terminated the statement.
    pub delimiter: Delimiter,
    /// Whether the statement may run inside a transaction.
    pub execute_in_transaction: bool,
    /// Execution kind.
    pub kind: StatementKind,
}

impl Statement {
    /// Create a standard, transactional statement.
    pub fn new(line_number: usize, sql: impl Into<String>, delimiter: Delimiter) -> Self {
        Self {
            line_number,
            sql: sql.into(),
            delimiter,
            execute_in_transaction: true,
            kind: StatementKind::Standard,
        }
    }

    /// For `COPY ... FROM STDIN`, split into the command and the data lines.
    pub fn copy_parts(&self) -> Option<(&str, &str)> {
        if self.kind != StatementKind::CopyFromStdin {
            return None;
        }
        Some(match self.sql.split_once('\n') {
            Some((command, data)) => (command.trim_end_matches(';').trim_end(), data),
            None => (self.sql.trim_end_matches(';').trim_end(), ""),
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.sql, self.delimiter)
    }
}
