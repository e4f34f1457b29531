//! Error types for script parsing and execution.

use thiserror::Error;

/// Result type alias for SQL script operations.
pub type SqlResult<T> = Result<T, SqlError>;

/// Errors that can occur while parsing or executing a SQL script.
#[derive(Debug, Clone, Error)]
pub enum SqlError {
    /// A string literal or comment was still open at the end of the script.
    #[error("Unterminated {construct} starting at line {line}")]
    Unterminated {
        /// What was left open ("string literal", "comment", ...).
        construct: &'static str,
        /// Line on which the open construct's statement began.
        line: usize,
    },

    /// A non-transactional statement appeared in a transactional script.
    #[error(
        "Detected both transactional and non-transactional statements within the same script \
         (even though mixed is false). Offending statement found at line {line}: {sql}"
    )]
    MixedTransactionality {
        /// Line of the offending statement.
        line: usize,
        /// Text of the offending statement.
        sql: String,
    },

    /// A `${name}` placeholder had no configured value.
    #[error("No value provided for placeholder: {0}. Check your configuration!")]
    MissingPlaceholder(String),

    /// Placeholder prefix/suffix could not be turned into a pattern.
    #[error("Invalid placeholder syntax: {0}")]
    InvalidPlaceholderSyntax(String),

    /// Error reported by the statement executor.
    #[error("Database error: {0}")]
    Database(String),

    /// A statement failed while executing.
    #[error("Statement at line {line} failed: {message}\nSQL: {sql}")]
    StatementFailed {
        /// Line of the failed statement.
        line: usize,
        /// Text of the failed statement.
        sql: String,
        /// Error detail reported by the executor.
        message: String,
    },
}

impl SqlError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a statement failure.
    pub fn statement_failed(line: usize, sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatementFailed {
            line,
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Check if this error was raised before anything was executed.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::Unterminated { .. }
                | Self::MixedTransactionality { .. }
                | Self::MissingPlaceholder(_)
                | Self::InvalidPlaceholderSyntax(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unterminated_display() {
        let err = SqlError::Unterminated {
            construct: "string literal",
            line: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("string literal"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_statement_failed_display() {
        let err = SqlError::statement_failed(3, "SELECT x", "column x does not exist");
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("SELECT x"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_is_parse_error() {
        assert!(SqlError::MissingPlaceholder("schema".into()).is_parse_error());
        assert!(!SqlError::database("connection reset").is_parse_error());
    }
}
