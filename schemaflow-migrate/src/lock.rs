//! Exclusive locking of the schema history during migration runs.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use schemaflow_sql::LockMode;
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};

/// Offset added to advisory lock keys so they do not collide with small
/// application-chosen keys.
const ADVISORY_KEY_BASE: i64 = 77_431_708_279_161;

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// The history table in a schema.
    Table {
        /// Schema name.
        schema: String,
        /// Table name.
        table: String,
    },
    /// A whole schema.
    Schema {
        /// Schema name.
        schema: String,
    },
}

impl LockScope {
    /// Scope for a history table.
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self::Table {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Scope for a schema.
    pub fn schema(schema: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
        }
    }

    /// Qualified name of the locked object.
    pub fn name(&self) -> String {
        match self {
            Self::Table { schema, table } => format!("{schema}.{table}"),
            Self::Schema { schema } => schema.clone(),
        }
    }

    /// Stable key for database advisory locks.
    pub fn advisory_key(&self) -> i64 {
        ADVISORY_KEY_BASE + i64::from(crc32fast::hash(self.name().as_bytes()))
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The database-side lock operations.
#[async_trait]
pub trait LockPrimitive: Send + Sync {
    /// Try to take the lock without waiting. Returns whether it was taken.
    async fn try_acquire(&self, scope: &LockScope) -> MigrateResult<bool>;

    /// Take the lock, waiting as long as necessary.
    async fn acquire(&self, scope: &LockScope) -> MigrateResult<()> {
        Err(MigrationError::lock_failed(format!(
            "blocking acquisition of {scope} is not supported"
        )))
    }

    /// Release the lock.
    async fn release(&self, scope: &LockScope) -> MigrateResult<()>;
}

/// Runs work while holding an exclusive lock.
///
/// Nested calls on the same coordinator reuse the lock already held. The
/// lock is released on every exit path of the outermost call, including a
/// panic in the body, which is resumed after release.
pub struct LockCoordinator {
    primitive: Arc<dyn LockPrimitive>,
    mode: LockMode,
    retry_interval: Duration,
    max_attempts: Option<u32>,
    depth: Mutex<usize>,
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("mode", &self.mode)
            .field("retry_interval", &self.retry_interval)
            .field("max_attempts", &self.max_attempts)
            .field("depth", &*self.depth.lock())
            .finish()
    }
}

impl LockCoordinator {
    /// Default delay between advisory lock attempts.
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

    /// Create a coordinator using the strategy for `mode`.
    pub fn new(primitive: Arc<dyn LockPrimitive>, mode: LockMode) -> Self {
        Self {
            primitive,
            mode,
            retry_interval: Self::DEFAULT_RETRY_INTERVAL,
            max_attempts: None,
            depth: Mutex::new(0),
        }
    }

    /// Set the delay between advisory lock attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Bound the number of advisory lock attempts.
    pub fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Whether this coordinator actually locks anything.
    pub fn is_supported(&self) -> bool {
        self.mode != LockMode::None
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        *self.depth.lock()
    }

    /// Run `body` while holding the lock on `scope`.
    pub async fn with_lock<T, F, Fut>(&self, scope: &LockScope, body: F) -> MigrateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MigrateResult<T>>,
    {
        let outermost = {
            let mut depth = self.depth.lock();
            *depth += 1;
            *depth == 1
        };

        if outermost {
            if let Err(err) = self.acquire(scope).await {
                *self.depth.lock() -= 1;
                return Err(err);
            }
        }

        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;

        *self.depth.lock() -= 1;
        let released = if outermost {
            self.release(scope).await
        } else {
            Ok(())
        };

        match outcome {
            Err(panic) => {
                if let Err(err) = released {
                    warn!(scope = %scope, error = %err, "Failed to release lock after panic");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(err)) => {
                if let Err(release_err) = released {
                    warn!(scope = %scope, error = %release_err, "Failed to release lock");
                }
                Err(err)
            }
            Ok(Ok(value)) => {
                released?;
                Ok(value)
            }
        }
    }

    async fn acquire(&self, scope: &LockScope) -> MigrateResult<()> {
        match self.mode {
            LockMode::None => Ok(()),
            LockMode::RowLock => {
                debug!(scope = %scope, "Acquiring row lock");
                self.primitive.acquire(scope).await
            }
            LockMode::Advisory => {
                let mut attempts: u32 = 0;
                loop {
                    if self.primitive.try_acquire(scope).await? {
                        debug!(scope = %scope, key = scope.advisory_key(), attempts, "Acquired advisory lock");
                        return Ok(());
                    }
                    attempts += 1;
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(MigrationError::lock_failed(format!(
                            "Number of retries exceeded while attempting to acquire lock on {scope} ({attempts} attempts)"
                        )));
                    }
                    debug!(scope = %scope, attempts, "Waiting for lock");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    async fn release(&self, scope: &LockScope) -> MigrateResult<()> {
        if self.mode == LockMode::None {
            return Ok(());
        }
        debug!(scope = %scope, "Releasing lock");
        self.primitive.release(scope).await
    }
}
