//! Parsed SQL scripts.

use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::executor::SqlExecutor;
use crate::statement::Statement;
use crate::tokenizer::StatementTokenizer;

/// The ordered statements of one script and its transaction policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    statements: Vec<Statement>,
    execute_in_transaction: bool,
}

impl SqlScript {
    /// Parse a script.
    ///
    /// A script runs in a transaction unless one of its statements cannot.
    /// When transactional and non-transactional statements are combined and
    /// `mixed` is false, parsing fails.
    pub fn parse(source: &str, dialect: &Dialect, mixed: bool) -> SqlResult<Self> {
        let statements = StatementTokenizer::new(dialect).tokenize(source)?;
        let execute_in_transaction = statements.iter().all(|s| s.execute_in_transaction);

        if !execute_in_transaction && !mixed {
            let has_transactional = statements.iter().any(|s| s.execute_in_transaction);
            if has_transactional {
                if let Some(offender) = statements.iter().find(|s| !s.execute_in_transaction) {
                    return Err(SqlError::MixedTransactionality {
                        line: offender.line_number,
                        sql: offender.sql.clone(),
                    });
                }
            }
        }

        Ok(Self {
            statements,
            execute_in_transaction,
        })
    }

    /// Build a script from already-split statements.
    pub fn from_statements(statements: Vec<Statement>) -> Self {
        let execute_in_transaction = statements.iter().all(|s| s.execute_in_transaction);
        Self {
            statements,
            execute_in_transaction,
        }
    }

    /// Statements in source order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Whether the script may run inside a transaction.
    pub fn execute_in_transaction(&self) -> bool {
        self.execute_in_transaction
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the script has no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Execute every statement in order, stopping at the first failure.
    pub async fn execute(&self, executor: &dyn SqlExecutor) -> SqlResult<()> {
        for statement in &self.statements {
            debug!(line = statement.line_number, sql = %statement.sql, "Executing statement");
            match executor.execute(statement).await {
                Ok(()) => {}
                Err(SqlError::Database(message)) => {
                    return Err(SqlError::statement_failed(
                        statement.line_number,
                        statement.sql.clone(),
                        message,
                    ));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}
