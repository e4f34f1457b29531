//! Database dialects.
//!
//! A [`Dialect`] is a plain capability struct: the lexical rules the
//! tokenizer needs (comment markers, quoting styles, delimiter directives)
//! plus the handful of engine capabilities the migration layer consults
//! (`supports_ddl_transactions`, `lock_mode`). Behaviour that cannot be
//! expressed as data, such as detecting a PL/SQL block or a non-transactional
//! PostgreSQL statement, is dispatched on [`DialectKind`] by the hook methods
//! at the bottom of this module.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::delimiter::Delimiter;

/// Identifies a supported database family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    /// ANSI-ish SQL with `--` and `/* */` comments.
    Generic,
    /// PostgreSQL (and compatible engines such as CockroachDB).
    PostgreSql,
    /// MySQL and MariaDB.
    MySql,
    /// Oracle.
    Oracle,
    /// Microsoft SQL Server.
    SqlServer,
    /// IBM DB2.
    Db2,
    /// SQLite.
    Sqlite,
}

/// How concurrent migration runs are serialized on this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Session-level advisory lock acquired by polling.
    Advisory,
    /// Row lock on the history table (`SELECT ... FOR UPDATE`) inside a
    /// transaction.
    RowLock,
    /// No locking primitive is available.
    None,
}

/// Procedural block rule used to suspend termination inside BEGIN ... END.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRule {
    /// Blocks never affect termination.
    None,
    /// BEGIN/CASE open a block and END closes it while the statement is a
    /// routine or trigger definition.
    BeginEnd,
}

/// Lexical rules and engine capabilities of one database dialect.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Database family.
    pub kind: DialectKind,
    /// Display name.
    pub name: &'static str,
    /// Delimiter in effect at the start of every script.
    pub default_delimiter: Delimiter,
    /// Single-line comment markers.
    pub line_comments: &'static [&'static str],
    /// Whether `/* */` comments nest.
    pub nested_comments: bool,
    /// Prefix of comments that are executable directives (MySQL `/*!`).
    pub comment_directive: Option<&'static str>,
    /// Keyword of a line that changes the delimiter (MySQL `DELIMITER`).
    pub delimiter_directive: Option<&'static str>,
    /// Backslash escapes inside `'...'` literals.
    pub backslash_escapes: bool,
    /// `` `...` `` quoted identifiers.
    pub backtick_quotes: bool,
    /// `[...]` quoted identifiers.
    pub bracket_quotes: bool,
    /// `$tag$ ... $tag$` quoting.
    pub dollar_quotes: bool,
    /// Oracle `q'[...]'` alternative quoting.
    pub alternative_quotes: bool,
    /// PostgreSQL `E'...'` escape strings.
    pub escape_strings: bool,
    /// Procedural block handling.
    pub block_rule: BlockRule,
    /// Whether DDL participates in transactions.
    pub supports_ddl_transactions: bool,
    /// Locking strategy for migration runs.
    pub lock_mode: LockMode,
}

impl Dialect {
    /// ANSI SQL.
    pub fn generic() -> Self {
        Self {
            kind: DialectKind::Generic,
            name: "Generic",
            default_delimiter: Delimiter::SEMICOLON,
            line_comments: &["--"],
            nested_comments: false,
            comment_directive: None,
            delimiter_directive: None,
            backslash_escapes: false,
            backtick_quotes: false,
            bracket_quotes: false,
            dollar_quotes: false,
            alternative_quotes: false,
            escape_strings: false,
            block_rule: BlockRule::None,
            supports_ddl_transactions: false,
            lock_mode: LockMode::None,
        }
    }

    /// PostgreSQL.
    pub fn postgresql() -> Self {
        Self {
            kind: DialectKind::PostgreSql,
            name: "PostgreSQL",
            nested_comments: true,
            dollar_quotes: true,
            escape_strings: true,
            supports_ddl_transactions: true,
            lock_mode: LockMode::Advisory,
            ..Self::generic()
        }
    }

    /// MySQL and MariaDB.
    pub fn mysql() -> Self {
        Self {
            kind: DialectKind::MySql,
            name: "MySQL",
            line_comments: &["--", "#"],
            comment_directive: Some("/*!"),
            delimiter_directive: Some("DELIMITER"),
            backslash_escapes: true,
            backtick_quotes: true,
            lock_mode: LockMode::Advisory,
            ..Self::generic()
        }
    }

    /// Oracle.
    pub fn oracle() -> Self {
        Self {
            kind: DialectKind::Oracle,
            name: "Oracle",
            alternative_quotes: true,
            lock_mode: LockMode::RowLock,
            ..Self::generic()
        }
    }

    /// Microsoft SQL Server.
    pub fn sqlserver() -> Self {
        Self {
            kind: DialectKind::SqlServer,
            name: "SQL Server",
            default_delimiter: Delimiter::GO,
            nested_comments: true,
            bracket_quotes: true,
            supports_ddl_transactions: true,
            lock_mode: LockMode::Advisory,
            ..Self::generic()
        }
    }

    /// IBM DB2.
    pub fn db2() -> Self {
        Self {
            kind: DialectKind::Db2,
            name: "DB2",
            delimiter_directive: Some("--#SET TERMINATOR"),
            block_rule: BlockRule::BeginEnd,
            supports_ddl_transactions: true,
            lock_mode: LockMode::RowLock,
            ..Self::generic()
        }
    }

    /// SQLite.
    pub fn sqlite() -> Self {
        Self {
            kind: DialectKind::Sqlite,
            name: "SQLite",
            backtick_quotes: true,
            bracket_quotes: true,
            block_rule: BlockRule::BeginEnd,
            supports_ddl_transactions: true,
            ..Self::generic()
        }
    }

    /// Look up a dialect by name. Accepts common aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "generic" | "ansi" => Some(Self::generic()),
            "postgresql" | "postgres" | "pg" | "cockroachdb" => Some(Self::postgresql()),
            "mysql" | "mariadb" => Some(Self::mysql()),
            "oracle" => Some(Self::oracle()),
            "sqlserver" | "mssql" => Some(Self::sqlserver()),
            "db2" => Some(Self::db2()),
            "sqlite" => Some(Self::sqlite()),
            _ => None,
        }
    }

    /// Parse a delimiter directive line (`DELIMITER $$`, `--#SET TERMINATOR @`).
    pub fn parse_delimiter_directive(&self, line: &str) -> Option<Delimiter> {
        let keyword = self.delimiter_directive?;
        let trimmed = line.trim();
        let head = trimmed.get(..keyword.len())?;
        if !head.eq_ignore_ascii_case(keyword) {
            return None;
        }
        let rest = &trimmed[keyword.len()..];
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let text = rest.trim();
        if text.is_empty() {
            return None;
        }
        Some(Delimiter::new(text, false))
    }

    /// Whether the line opens an executable comment directive.
    pub fn is_comment_directive(&self, line: &str) -> bool {
        self.comment_directive
            .is_some_and(|prefix| line.trim_start().starts_with(prefix))
    }

    /// Whether a line starting at `rest` is a single-line comment, given the
    /// delimiter in effect. A marker that begins the active delimiter is not
    /// a comment when the delimiter itself matches here.
    pub(crate) fn line_comment_at(&self, rest: &str, delimiter: Option<&Delimiter>) -> bool {
        for marker in self.line_comments {
            if !rest.starts_with(marker) {
                continue;
            }
            if let Some(delim) = delimiter {
                let text = delim.text();
                if text.starts_with(marker) && starts_with_ignore_case(rest, text) {
                    return false;
                }
            }
            // DB2 directives look like comments
            let is_directive = self
                .delimiter_directive
                .is_some_and(|d| d.starts_with(marker) && starts_with_ignore_case(rest, d));
            return !is_directive;
        }
        false
    }

    /// Whether a statement with this normalized start cannot run in a
    /// transaction.
    pub fn is_non_transactional(&self, statement_start: &str) -> bool {
        let patterns: &[Regex] = match self.kind {
            DialectKind::PostgreSql => &POSTGRES_NON_TRANSACTIONAL,
            DialectKind::SqlServer => &SQLSERVER_NON_TRANSACTIONAL,
            DialectKind::Sqlite => &SQLITE_NON_TRANSACTIONAL,
            _ => return false,
        };
        patterns.iter().any(|re| re.is_match(statement_start))
    }

    /// Delimiter adjustment requested after a line has been appended.
    /// `paren_depth` is the balance of parentheses outside literals and
    /// comments so far in the statement.
    pub(crate) fn delimiter_hint(&self, statement_start: &str, paren_depth: i32) -> DelimiterHint {
        match self.kind {
            DialectKind::Oracle => {
                if DECLARE_BEGIN.is_match(statement_start)
                    || ORACLE_PLSQL.is_match(statement_start)
                    || ORACLE_JAVA.is_match(statement_start)
                {
                    DelimiterHint::Switch(Delimiter::SLASH)
                } else {
                    DelimiterHint::Keep
                }
            }
            DialectKind::PostgreSql => {
                if POSTGRES_COPY_STDIN.is_match(statement_start) {
                    DelimiterHint::Copy
                } else if POSTGRES_RULE.is_match(statement_start) {
                    // the rule body is a parenthesized list of commands
                    if paren_depth > 0 {
                        DelimiterHint::Suspend
                    } else {
                        DelimiterHint::Restore
                    }
                } else {
                    DelimiterHint::Keep
                }
            }
            _ => DelimiterHint::Keep,
        }
    }

    /// Change in procedural block depth contributed by a line's words, or
    /// `None` when blocks do not apply to this statement.
    pub(crate) fn block_delta(&self, statement_start: &str, words: &[String]) -> Option<i32> {
        if self.block_rule == BlockRule::None {
            return None;
        }
        let applies = match self.kind {
            DialectKind::Db2 => DB2_ROUTINE.is_match(statement_start),
            DialectKind::Sqlite => SQLITE_TRIGGER.is_match(statement_start),
            _ => CREATE_TRIGGER.is_match(statement_start),
        };
        if !applies {
            return None;
        }

        let mut delta = 0;
        let mut iter = words.iter().peekable();
        while let Some(word) = iter.next() {
            match word.as_str() {
                "BEGIN" | "CASE" => delta += 1,
                "END" => match iter.peek().map(|next| next.as_str()) {
                    // closers of constructs that never opened a block
                    Some("IF" | "LOOP" | "WHILE" | "FOR" | "REPEAT") => {
                        iter.next();
                    }
                    Some("CASE") => {
                        iter.next();
                        delta -= 1;
                    }
                    _ => delta -= 1,
                },
                _ => {}
            }
        }
        Some(delta)
    }

    /// Whether a statement is a client-side command that must not be sent
    /// to the database.
    pub(crate) fn is_client_command(&self, statement_start: &str) -> bool {
        self.kind == DialectKind::Oracle && SQLPLUS_COMMAND.is_match(statement_start)
    }

    /// Whether a line that is just this text should be skipped between
    /// statements.
    pub(crate) fn is_lone_separator(&self, normalized: &str, delimiter: &Delimiter) -> bool {
        normalized == delimiter.text().to_ascii_uppercase()
            || (self.kind == DialectKind::Oracle && normalized == "/")
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::generic()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Adjustment of the active delimiter requested by a dialect hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DelimiterHint {
    Keep,
    Switch(Delimiter),
    /// Enter `COPY ... FROM STDIN` data mode.
    Copy,
    /// Disable termination until restored.
    Suspend,
    /// Go back to the delimiter the statement started with.
    Restore,
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static dialect pattern"))
        .collect()
}

fn compile_one(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static dialect pattern")
}

static POSTGRES_NON_TRANSACTIONAL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^(CREATE|DROP) (DATABASE|TABLESPACE|SUBSCRIPTION)\b",
        r"^ALTER SYSTEM\b",
        r"^(CREATE|DROP)( UNIQUE)? INDEX CONCURRENTLY\b",
        r"^REINDEX( \(.*\))? (SCHEMA|DATABASE|SYSTEM)\b",
        r"^VACUUM\b",
        r"^DISCARD ALL\b",
        r"^ALTER TYPE .* ADD VALUE\b",
    ])
});

static SQLSERVER_NON_TRANSACTIONAL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^(CREATE|ALTER|DROP) DATABASE\b",
        r"^(BACKUP|RESTORE)\b",
        r"^(CREATE|ALTER|DROP) FULLTEXT\b",
    ])
});

static SQLITE_NON_TRANSACTIONAL: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^VACUUM\b"]));

static DECLARE_BEGIN: LazyLock<Regex> = LazyLock::new(|| compile_one(r"^(DECLARE|BEGIN)\b"));

static ORACLE_PLSQL: LazyLock<Regex> = LazyLock::new(|| {
    compile_one(
        r"^CREATE( OR REPLACE)?( (NON)?EDITIONABLE)? (FUNCTION|PROCEDURE|PACKAGE|TYPE|TRIGGER|LIBRARY)\b",
    )
});

static ORACLE_JAVA: LazyLock<Regex> = LazyLock::new(|| {
    compile_one(
        r"^CREATE( OR REPLACE)?( AND (RESOLVE|COMPILE))?( NOFORCE)? JAVA (SOURCE|RESOURCE|CLASS)\b",
    )
});

static SQLPLUS_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    compile_one(
        r"^(PROMPT|REM|REMARK|SPOOL|WHENEVER|SHOW|EXIT|SET (ECHO|FEEDBACK|SERVEROUTPUT|DEFINE|TIMING|HEADING|LINESIZE|PAGESIZE|VERIFY|TERMOUT|TRIMSPOOL|SQLBLANKLINES|SCAN)|@)",
    )
});

static POSTGRES_COPY_STDIN: LazyLock<Regex> =
    LazyLock::new(|| compile_one(r"^COPY .* FROM STDIN\b"));

static POSTGRES_RULE: LazyLock<Regex> =
    LazyLock::new(|| compile_one(r"^CREATE( OR REPLACE)? RULE .* DO (ALSO |INSTEAD )?\("));

static DB2_ROUTINE: LazyLock<Regex> = LazyLock::new(|| {
    compile_one(r"^CREATE( OR REPLACE)? (FUNCTION|PROCEDURE|TRIGGER)\b")
});

static SQLITE_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| compile_one(r"^CREATE( TEMP| TEMPORARY)? TRIGGER\b"));

static CREATE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| compile_one(r"^CREATE TRIGGER\b"));
