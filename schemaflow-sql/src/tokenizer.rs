//! Line-oriented statement splitting.
//!
//! Scripts are consumed one physical line at a time. A [`TokenizerState`]
//! value is threaded through every line: it carries the delimiter currently
//! in effect, any comment left open between statements, and the statement
//! being assembled. Each call to [`TokenizerState::advance`] consumes the old
//! state and returns the next one, plus a statement when the line completed
//! one.
//!
//! Termination is tested per line: a statement ends on the line whose code
//! (comments removed, literals kept) ends with the delimiter, or, for
//! alone-on-line delimiters, consists of nothing but the delimiter.

use tracing::{debug, warn};

use crate::delimiter::Delimiter;
use crate::dialect::{Dialect, DelimiterHint};
use crate::error::{SqlError, SqlResult};
use crate::scanner::{LexState, LineScan, scan_line};
use crate::statement::{Statement, StatementKind};

/// Upper bound on the normalized statement prefix kept for pattern hooks.
const STATEMENT_START_LIMIT: usize = 4096;

/// Splits scripts into statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementTokenizer<'a> {
    dialect: &'a Dialect,
}

impl<'a> StatementTokenizer<'a> {
    /// Create a tokenizer.
    pub fn new(dialect: &'a Dialect) -> Self {
        Self { dialect }
    }

    /// Split `source` into statements, in source order.
    pub fn tokenize(&self, source: &str) -> SqlResult<Vec<Statement>> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let mut state = TokenizerState::new(self.dialect);
        let mut statements = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            let (next, emitted) = state.advance(self.dialect, idx + 1, line);
            state = next;
            statements.extend(emitted);
        }
        statements.extend(state.finish()?);

        debug!(
            dialect = %self.dialect,
            statements = statements.len(),
            "Split script into statements"
        );
        Ok(statements)
    }
}

/// Tokenizer state between two lines.
#[derive(Debug, Clone)]
pub struct TokenizerState {
    delimiter: Delimiter,
    between: LexState,
    between_line: usize,
    current: Option<StatementState>,
}

/// The statement being assembled.
#[derive(Debug, Clone)]
struct StatementState {
    lines: Vec<String>,
    start_line: usize,
    initial_delimiter: Delimiter,
    /// `None` while termination is suspended.
    delimiter: Option<Delimiter>,
    lex: LexState,
    block_depth: i32,
    paren_depth: i32,
    statement_start: String,
    execute_in_transaction: bool,
    kind: StatementKind,
}

impl StatementState {
    fn new(start_line: usize, delimiter: &Delimiter) -> Self {
        Self {
            lines: Vec::new(),
            start_line,
            initial_delimiter: delimiter.clone(),
            delimiter: Some(delimiter.clone()),
            lex: LexState::default(),
            block_depth: 0,
            paren_depth: 0,
            statement_start: String::new(),
            execute_in_transaction: true,
            kind: StatementKind::Standard,
        }
    }

    fn into_statement(mut self, delimiter: Delimiter, last: Option<&LineScan>) -> Statement {
        if delimiter.is_alone_on_line() {
            self.lines.pop();
        } else if let (Some(scan), Some(line)) = (last, self.lines.last_mut()) {
            if let Some(offset) = scan.delimiter_offset(delimiter.text()) {
                line.truncate(offset);
            }
        }

        Statement {
            line_number: self.start_line,
            sql: self.lines.join("\n").trim().to_string(),
            delimiter,
            execute_in_transaction: self.execute_in_transaction,
            kind: self.kind,
        }
    }
}

impl TokenizerState {
    /// Initial state for a script in `dialect`.
    pub fn new(dialect: &Dialect) -> Self {
        Self {
            delimiter: dialect.default_delimiter.clone(),
            between: LexState::default(),
            between_line: 0,
            current: None,
        }
    }

    /// The delimiter that the next statement will start with.
    pub fn delimiter(&self) -> &Delimiter {
        &self.delimiter
    }

    /// Whether a statement is being assembled.
    pub fn in_statement(&self) -> bool {
        self.current.is_some()
    }

    /// Consume one line.
    pub fn advance(
        mut self,
        dialect: &Dialect,
        line_number: usize,
        line: &str,
    ) -> (Self, Option<Statement>) {
        match self.current.take() {
            Some(statement) => self.continue_statement(dialect, statement, line),
            None => self.between_statements(dialect, line_number, line),
        }
    }

    /// Finish the script, emitting any unterminated trailing statement.
    pub fn finish(self) -> SqlResult<Option<Statement>> {
        let Some(statement) = self.current else {
            if let Some(construct) = self.between.open_construct() {
                return Err(SqlError::Unterminated {
                    construct,
                    line: self.between_line,
                });
            }
            return Ok(None);
        };

        if statement.kind == StatementKind::Standard {
            if let Some(construct) = statement.lex.open_construct() {
                return Err(SqlError::Unterminated {
                    construct,
                    line: statement.start_line,
                });
            }
        }

        let delimiter = statement
            .delimiter
            .clone()
            .unwrap_or_else(|| statement.initial_delimiter.clone());
        let mut emitted = statement.into_statement(delimiter, None);
        if emitted.sql.is_empty() {
            return Ok(None);
        }
        // nothing was stripped, so the delimiter is whatever was in effect
        emitted.delimiter = self.delimiter;
        Ok(Some(emitted))
    }

    fn between_statements(
        mut self,
        dialect: &Dialect,
        line_number: usize,
        line: &str,
    ) -> (Self, Option<Statement>) {
        if line.trim().is_empty() {
            return (self, None);
        }

        let mut text = line;
        if self.between.is_open() {
            let scan = scan_line(line, &self.between, dialect, Some(&self.delimiter));
            match scan.comment_end {
                Some(end) => {
                    self.between = LexState::default();
                    text = &line[end..];
                    if text.trim().is_empty() {
                        return (self, None);
                    }
                }
                None => {
                    self.between = scan.state;
                    return (self, None);
                }
            }
        }

        if dialect.is_comment_directive(text) {
            return self.start_statement(dialect, line_number, text);
        }

        if let Some(delimiter) = dialect.parse_delimiter_directive(text) {
            debug!(line = line_number, delimiter = %delimiter.text(), "Delimiter changed");
            self.delimiter = delimiter;
            return (self, None);
        }

        let scan = scan_line(text, &LexState::default(), dialect, Some(&self.delimiter));
        let normalized = scan.normalized();
        if normalized.is_empty() {
            if scan.state.is_open() {
                self.between = scan.state;
                self.between_line = line_number;
            }
            return (self, None);
        }
        if dialect.is_lone_separator(&normalized, &self.delimiter) {
            return (self, None);
        }

        self.start_statement(dialect, line_number, text)
    }

    fn start_statement(
        self,
        dialect: &Dialect,
        line_number: usize,
        text: &str,
    ) -> (Self, Option<Statement>) {
        let statement = StatementState::new(line_number, &self.delimiter);
        self.continue_statement(dialect, statement, text)
    }

    fn continue_statement(
        mut self,
        dialect: &Dialect,
        mut statement: StatementState,
        line: &str,
    ) -> (Self, Option<Statement>) {
        statement.lines.push(line.to_string());

        // COPY data is passed through untouched
        if statement.kind == StatementKind::CopyFromStdin {
            if Delimiter::COPY_END.terminates(line.trim()) {
                let emitted = statement.into_statement(Delimiter::COPY_END, None);
                return (self, Some(emitted));
            }
            self.current = Some(statement);
            return (self, None);
        }

        let scan = scan_line(line, &statement.lex, dialect, statement.delimiter.as_ref());
        statement.lex = scan.state.clone();
        let normalized = scan.normalized();

        if !normalized.is_empty() {
            if statement.statement_start.len() < STATEMENT_START_LIMIT {
                if !statement.statement_start.is_empty() {
                    statement.statement_start.push(' ');
                }
                statement.statement_start.push_str(&normalized);
            }

            if statement.lines.len() == 1 && dialect.is_client_command(&statement.statement_start) {
                warn!(
                    line = statement.start_line,
                    command = %line.trim(),
                    "Skipping client-side command that cannot be sent to the database"
                );
                return (self, None);
            }

            if statement.execute_in_transaction
                && dialect.is_non_transactional(&statement.statement_start)
            {
                statement.execute_in_transaction = false;
            }

            statement.paren_depth += scan.paren_delta;
            match dialect.delimiter_hint(&statement.statement_start, statement.paren_depth) {
                DelimiterHint::Keep => {}
                DelimiterHint::Switch(delimiter) => statement.delimiter = Some(delimiter),
                DelimiterHint::Copy => {
                    statement.kind = StatementKind::CopyFromStdin;
                    statement.delimiter = Some(Delimiter::COPY_END);
                    self.current = Some(statement);
                    return (self, None);
                }
                DelimiterHint::Suspend => statement.delimiter = None,
                DelimiterHint::Restore => {
                    statement.delimiter = Some(statement.initial_delimiter.clone());
                }
            }

            if let Some(delta) = dialect.block_delta(&statement.statement_start, &scan.words) {
                statement.block_depth += delta;
            }
        }

        if statement.lex.is_open() {
            self.current = Some(statement);
            return (self, None);
        }

        let terminator = match &statement.delimiter {
            Some(delimiter)
                if delimiter.terminates(&normalized)
                    && !(statement.block_depth > 0 && *delimiter == dialect.default_delimiter) =>
            {
                Some(delimiter.clone())
            }
            _ => None,
        };

        match terminator {
            Some(delimiter) => {
                let emitted = statement.into_statement(delimiter, Some(&scan));
                (self, Some(emitted))
            }
            None => {
                self.current = Some(statement);
                (self, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn split(dialect: &Dialect, source: &str) -> Vec<(usize, String)> {
        StatementTokenizer::new(dialect)
            .tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| (s.line_number, s.sql))
            .collect()
    }

    #[test]
    fn test_comment_between_statements() {
        let statements = split(&Dialect::generic(), "SELECT 1;\n-- comment\nSELECT 2;");
        assert_eq!(
            statements,
            vec![(1, "SELECT 1".to_string()), (3, "SELECT 2".to_string())]
        );
    }

    #[test]
    fn test_blank_lines_kept_inside_statement() {
        let statements = split(&Dialect::generic(), "\n\nSELECT\n\n1;\n\n");
        assert_eq!(statements, vec![(3, "SELECT\n\n1".to_string())]);
    }

    #[test]
    fn test_comment_only_script() {
        let dialect = Dialect::postgresql();
        assert!(split(&dialect, "-- one\n/* two\n three */\n\n-- four").is_empty());
    }

    #[test]
    fn test_delimiter_inside_literal() {
        let statements = split(
            &Dialect::generic(),
            "INSERT INTO t VALUES ('a;\nb;');\nSELECT 1;",
        );
        assert_eq!(
            statements,
            vec![
                (1, "INSERT INTO t VALUES ('a;\nb;')".to_string()),
                (3, "SELECT 1".to_string()),
            ]
        );
    }

    #[test]
    fn test_trailing_statement_without_delimiter() {
        let statements = split(&Dialect::generic(), "SELECT 1;\nSELECT 2");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], (2, "SELECT 2".to_string()));
    }

    #[test]
    fn test_unterminated_literal_is_error() {
        let err = StatementTokenizer::new(&Dialect::generic())
            .tokenize("SELECT 'oops;\n")
            .unwrap_err();
        assert!(matches!(
            err,
            SqlError::Unterminated {
                construct: "string literal",
                line: 1
            }
        ));
    }

    #[test]
    fn test_unterminated_comment_is_error() {
        let err = StatementTokenizer::new(&Dialect::generic())
            .tokenize("SELECT 1;\n/* never closed\n")
            .unwrap_err();
        assert!(matches!(err, SqlError::Unterminated { construct: "comment", line: 2 }));
    }

    #[test]
    fn test_statement_after_comment_close_on_same_line() {
        let statements = split(&Dialect::generic(), "/* header\n*/ SELECT 1;");
        assert_eq!(statements, vec![(2, "SELECT 1".to_string())]);
    }

    #[test]
    fn test_trailing_comment_after_delimiter_is_stripped() {
        let statements = split(&Dialect::generic(), "SELECT 1; -- done");
        assert_eq!(statements, vec![(1, "SELECT 1".to_string())]);
    }

    #[test]
    fn test_mysql_delimiter_directive() {
        let source = "DELIMITER $$\nCREATE PROCEDURE p()\nBEGIN\n  SELECT 1;\nEND $$\nDELIMITER ;\nSELECT 2;";
        let statements = StatementTokenizer::new(&Dialect::mysql())
            .tokenize(source)
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].line_number, 2);
        assert_eq!(
            statements[0].sql,
            "CREATE PROCEDURE p()\nBEGIN\n  SELECT 1;\nEND"
        );
        assert_eq!(statements[0].delimiter, Delimiter::new("$$", false));
        assert_eq!(statements[1].sql, "SELECT 2");
        assert_eq!(statements[1].delimiter, Delimiter::SEMICOLON);
    }

    #[test]
    fn test_mysql_comment_directive_is_statement() {
        let statements = split(
            &Dialect::mysql(),
            "/*!40101 SET NAMES utf8 */;\n# a comment\nSELECT 1;",
        );
        assert_eq!(
            statements,
            vec![
                (1, "/*!40101 SET NAMES utf8 */".to_string()),
                (3, "SELECT 1".to_string()),
            ]
        );
    }

    #[test]
    fn test_mysql_hash_delimiter() {
        let statements = split(&Dialect::mysql(), "DELIMITER #\nSELECT 1 #\nSELECT 2#");
        assert_eq!(
            statements,
            vec![(2, "SELECT 1".to_string()), (3, "SELECT 2".to_string())]
        );
    }

    #[test]
    fn test_sqlserver_go() {
        let source = "CREATE PROCEDURE p AS\nBEGIN\n  SELECT 1;\nEND\nGO\nSELECT 2\ngo";
        let statements = split(&Dialect::sqlserver(), source);
        assert_eq!(
            statements,
            vec![
                (1, "CREATE PROCEDURE p AS\nBEGIN\n  SELECT 1;\nEND".to_string()),
                (6, "SELECT 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_oracle_plsql_block() {
        let source = "CREATE OR REPLACE PROCEDURE p AS\nBEGIN\n  NULL;\nEND;\n/\nSELECT 1 FROM dual;";
        let statements = split(&Dialect::oracle(), source);
        assert_eq!(
            statements,
            vec![
                (1, "CREATE OR REPLACE PROCEDURE p AS\nBEGIN\n  NULL;\nEND;".to_string()),
                (6, "SELECT 1 FROM dual".to_string()),
            ]
        );
    }

    #[test]
    fn test_oracle_anonymous_block_and_sqlplus() {
        let source = "PROMPT creating things\nSET ECHO ON\nBEGIN\n  NULL;\nEND;\n/\n/";
        let statements = split(&Dialect::oracle(), source);
        assert_eq!(statements, vec![(3, "BEGIN\n  NULL;\nEND;".to_string())]);
    }

    #[test]
    fn test_db2_terminator_and_blocks() {
        let source = "CREATE PROCEDURE p()\nBEGIN\n  IF 1 = 1 THEN\n    SELECT 1;\n  END IF;\nEND;\nSELECT 2;";
        let statements = split(&Dialect::db2(), source);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].1.ends_with("END"));
        assert_eq!(statements[1], (7, "SELECT 2".to_string()));

        let directive = "--#SET TERMINATOR @\nSELECT 1@\nSELECT 2@";
        assert_eq!(
            split(&Dialect::db2(), directive),
            vec![(2, "SELECT 1".to_string()), (3, "SELECT 2".to_string())]
        );
    }

    #[test]
    fn test_sqlite_trigger() {
        let source = "CREATE TRIGGER tr AFTER INSERT ON t\nBEGIN\n  UPDATE t SET x = 1;\nEND;\nSELECT 1;";
        let statements = split(&Dialect::sqlite(), source);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].0, 1);
        assert!(statements[0].1.contains("UPDATE t SET x = 1;"));
    }

    #[test]
    fn test_postgres_dollar_function() {
        let source = "CREATE FUNCTION f() RETURNS trigger AS $$\nBEGIN\n  RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;\nSELECT 1;";
        let statements = split(&Dialect::postgresql(), source);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].1.ends_with("$$ LANGUAGE plpgsql"));
        assert_eq!(statements[1], (6, "SELECT 1".to_string()));
    }

    #[test]
    fn test_postgres_copy_from_stdin() {
        let source = "COPY t (a, b) FROM stdin;\n1\tx;y\n2\t'z\n\\.\nSELECT 1;";
        let statements = StatementTokenizer::new(&Dialect::postgresql())
            .tokenize(source)
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].kind, StatementKind::CopyFromStdin);
        assert_eq!(statements[0].sql, "COPY t (a, b) FROM stdin;\n1\tx;y\n2\t'z");
        assert_eq!(statements[1].line_number, 5);
    }

    #[test]
    fn test_postgres_non_transactional_flag() {
        let statements = StatementTokenizer::new(&Dialect::postgresql())
            .tokenize("CREATE INDEX CONCURRENTLY idx ON t (a);\nCREATE INDEX idx2 ON t (b);")
            .unwrap();
        assert!(!statements[0].execute_in_transaction);
        assert!(statements[1].execute_in_transaction);
    }

    #[test]
    fn test_postgres_rule_with_multiple_commands() {
        let source = "CREATE RULE r AS ON INSERT TO t DO INSTEAD (\n  INSERT INTO a VALUES (1);\n  INSERT INTO b VALUES (2);\n);\nSELECT 1;";
        let statements = split(&Dialect::postgresql(), source);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].1.contains("INSERT INTO b VALUES (2);"));
    }

    #[test]
    fn test_postgres_rule_with_paren_in_literal() {
        let source = "CREATE RULE r AS ON INSERT TO t DO INSTEAD (\n  INSERT INTO a VALUES (')');\n  INSERT INTO b VALUES ('((');\n);\nSELECT 1;\nSELECT 2;";
        let statements = split(&Dialect::postgresql(), source);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].1.ends_with(")"));
        assert_eq!(statements[1], (5, "SELECT 1".to_string()));
        assert_eq!(statements[2], (6, "SELECT 2".to_string()));
    }

    #[test]
    fn test_db2_end_case_closes_block() {
        let source = "CREATE PROCEDURE p()\nBEGIN\n  CASE x\n    WHEN 1 THEN SELECT 1 FROM t;\n  END CASE;\nEND;\nSELECT 2 FROM t;";
        let statements = split(&Dialect::db2(), source);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].1.contains("END CASE;"));
        assert_eq!(statements[1], (7, "SELECT 2 FROM t".to_string()));
    }

    #[test]
    fn test_state_is_threaded_by_value() {
        let dialect = Dialect::mysql();
        let state = TokenizerState::new(&dialect);
        let (state, emitted) = state.advance(&dialect, 1, "DELIMITER //");
        assert!(emitted.is_none());
        assert_eq!(state.delimiter(), &Delimiter::new("//", false));

        let (state, emitted) = state.advance(&dialect, 2, "SELECT 1;");
        assert!(emitted.is_none());
        assert!(state.in_statement());

        let (state, emitted) = state.advance(&dialect, 3, "//");
        assert_eq!(emitted.unwrap().sql, "SELECT 1;");
        assert!(!state.in_statement());
    }

    #[test]
    fn test_retokenizing_a_statement_is_stable() {
        let dialect = Dialect::sqlserver();
        let original = StatementTokenizer::new(&dialect)
            .tokenize("SELECT 'a'\nGO")
            .unwrap();
        let again = StatementTokenizer::new(&dialect)
            .tokenize(&original[0].to_string())
            .unwrap();
        assert_eq!(original, again);
    }
}
