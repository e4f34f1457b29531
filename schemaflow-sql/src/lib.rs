//! # schemaflow-sql
//!
//! Dialect-aware splitting of SQL migration scripts into executable
//! statements.
//!
//! Migration scripts are written for humans: they mix comments with code,
//! change delimiters half way through (`DELIMITER $$`, `--#SET TERMINATOR @`),
//! embed procedural bodies full of semicolons, and carry string literals that
//! span lines. This crate turns such text into an ordered list of
//! [`Statement`]s that can be sent to a database one at a time.
//!
//! ```text
//! script text ──▶ PlaceholderReplacer ──▶ StatementTokenizer ──▶ SqlScript
//!                                            │                    │
//!                                         Dialect             SqlExecutor
//! ```
//!
//! ## Example
//!
//! ```rust
//! use schemaflow_sql::{Dialect, SqlScript};
//!
//! let script = SqlScript::parse(
//!     "CREATE TABLE users (id int);\n-- seed\nINSERT INTO users VALUES (1);",
//!     &Dialect::postgresql(),
//!     false,
//! )
//! .unwrap();
//!
//! assert_eq!(script.len(), 2);
//! assert_eq!(script.statements()[1].line_number, 3);
//! assert!(script.execute_in_transaction());
//! ```
//!
//! ## Dialects
//!
//! | Dialect    | Default delimiter | Extras                                        |
//! |------------|-------------------|-----------------------------------------------|
//! | PostgreSQL | `;`               | `$tag$` quotes, `E''`, `COPY FROM STDIN`      |
//! | MySQL      | `;`               | `DELIMITER`, `#` comments, `/*! */` directives |
//! | Oracle     | `;`               | PL/SQL `/`, `q'[]'` quotes, SQL*Plus commands |
//! | SQL Server | `GO`              | `[ident]`, nested comments                    |
//! | DB2        | `;`               | `--#SET TERMINATOR`, BEGIN/END blocks         |
//! | SQLite     | `;`               | trigger BEGIN/END blocks                      |

pub mod delimiter;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod placeholder;
mod scanner;
pub mod script;
pub mod statement;
pub mod tokenizer;

pub use delimiter::Delimiter;
pub use dialect::{BlockRule, Dialect, DialectKind, LockMode};
pub use error::{SqlError, SqlResult};
pub use executor::SqlExecutor;
pub use placeholder::PlaceholderReplacer;
pub use script::SqlScript;
pub use statement::{Statement, StatementKind};
pub use tokenizer::{StatementTokenizer, TokenizerState};
