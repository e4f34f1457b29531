//! Statement execution interface.

use async_trait::async_trait;

use crate::error::SqlResult;
use crate::statement::Statement;

/// A database session that can run statements and control transactions.
///
/// Implementations wrap a concrete driver connection. All calls for one
/// migration run go to the same session, so `begin`/`commit` bracket the
/// statements executed in between.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one statement. Driver failures should be reported as
    /// [`SqlError::Database`](crate::SqlError::Database).
    async fn execute(&self, statement: &Statement) -> SqlResult<()>;

    /// Start a transaction.
    async fn begin(&self) -> SqlResult<()>;

    /// Commit the current transaction.
    async fn commit(&self) -> SqlResult<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> SqlResult<()>;
}
