//! End-to-end migration runs against the in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use schemaflow::migrate::{
    FileSystemScriptSource, InMemoryLock, InMemorySchemaHistory, InMemoryScriptSource,
    MigrateConfig, MigrationError, MigrationState, MigrationType, Migrator,
};
use schemaflow::sql::{Dialect, SqlExecutor, SqlResult, Statement};

/// Executor shared by several migrators that detects overlapping work.
#[derive(Default)]
struct OverlapState {
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    executed: Mutex<Vec<String>>,
}

struct OverlapExecutor(Arc<OverlapState>);

#[async_trait]
impl SqlExecutor for OverlapExecutor {
    async fn execute(&self, statement: &Statement) -> SqlResult<()> {
        if self.0.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.0.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        self.0.executed.lock().push(statement.sql.clone());
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn begin(&self) -> SqlResult<()> {
        Ok(())
    }

    async fn commit(&self) -> SqlResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> SqlResult<()> {
        Ok(())
    }
}

/// Two runs sharing a lock never overlap, and the second sees the first's
/// history rows instead of re-applying them.
#[tokio::test]
async fn test_concurrent_runs_are_serialized() {
    let source = Arc::new(
        InMemoryScriptSource::new()
            .with_script("V1__a.sql", "CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);")
            .with_script("V2__b.sql", "CREATE TABLE b (id INT);")
            .with_script("V3__c.sql", "CREATE TABLE c (id INT);")
            .with_script("R__views.sql", "CREATE VIEW v AS SELECT 1;"),
    );
    let history = Arc::new(InMemorySchemaHistory::new());
    let lock = Arc::new(InMemoryLock::new());
    let overlap = Arc::new(OverlapState::default());

    let migrator = || {
        Migrator::new(
            MigrateConfig::new().lock_retry(1, None),
            Dialect::postgresql(),
            source.clone(),
            history.clone(),
            lock.clone(),
            Arc::new(OverlapExecutor(overlap.clone())),
        )
        .expect("migrator")
    };
    let first = migrator();
    let second = migrator();

    let (a, b) = tokio::join!(first.migrate(), second.migrate());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(!overlap.overlapped.load(Ordering::SeqCst));
    assert_eq!(a.migrations_executed + b.migrations_executed, 4);
    assert_eq!(overlap.executed.lock().len(), 5);

    let rows = history.rows();
    assert_eq!(rows.len(), 4);
    let ranks: Vec<i32> = rows.iter().map(|r| r.installed_rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!(!lock.is_held(&schemaflow::migrate::LockScope::table("public", "flyway_schema_history")));
}

/// Scripts, sidecars and placeholders are read from disk.
#[tokio::test]
async fn test_migrate_from_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("db");
    tokio::fs::create_dir_all(root.join("nested")).await.unwrap();
    tokio::fs::write(
        root.join("V1__create_users.sql"),
        "-- users\nCREATE TABLE ${schema_name}.users (id INT);\n",
    )
    .await
    .unwrap();
    tokio::fs::write(
        root.join("nested/V1_1__index_users.sql"),
        "CREATE INDEX CONCURRENTLY users_id ON users (id);\n",
    )
    .await
    .unwrap();
    tokio::fs::write(root.join("V2__skipped.sql"), "SELECT 2;\n").await.unwrap();
    tokio::fs::write(root.join("V2__skipped.sql.conf"), "shouldExecute=false\n")
        .await
        .unwrap();
    tokio::fs::write(root.join("notes.txt"), "not a migration").await.unwrap();

    let location = format!("filesystem:{}", root.display());
    let config = MigrateConfig::new()
        .locations([location.clone()])
        .placeholder("schema_name", "app")
        .ignore_migration_patterns(vec!["*:ignored".parse().unwrap()]);
    let history = Arc::new(InMemorySchemaHistory::new());
    let connection = Arc::new(schemaflow::migrate::RecordingExecutor::new());
    let migrator = Migrator::from_config(
        config,
        Arc::new(FileSystemScriptSource::new([location])),
        history.clone(),
        Arc::new(InMemoryLock::new()),
        connection.clone(),
    )
    .unwrap();

    let outcome = migrator.migrate().await.unwrap();
    assert_eq!(outcome.migrations_executed, 2);
    assert_eq!(
        connection.log(),
        vec![
            "BEGIN",
            "CREATE TABLE app.users (id INT)",
            "COMMIT",
            "CREATE INDEX CONCURRENTLY users_id ON users (id)",
        ]
    );

    let info = migrator.info().await.unwrap();
    let skipped = info
        .all()
        .iter()
        .find(|i| i.description() == "skipped")
        .unwrap();
    assert_eq!(skipped.state(), MigrationState::Ignored);
    assert_eq!(history.rows()[1].script, "nested/V1_1__index_users.sql");
}

/// Baseline, migrate on top, then repair after the script disappears.
#[tokio::test]
async fn test_baseline_migrate_repair_cycle() {
    let source = Arc::new(
        InMemoryScriptSource::new()
            .with_script("V2__add.sql", "CREATE TABLE added (id INT);")
            .with_script("V3__more.sql", "CREATE TABLE more (id INT);"),
    );
    let history = Arc::new(InMemorySchemaHistory::new());
    let migrator = Migrator::new(
        MigrateConfig::new(),
        Dialect::postgresql(),
        source.clone(),
        history.clone(),
        Arc::new(InMemoryLock::new()),
        Arc::new(schemaflow::migrate::RecordingExecutor::new()),
    )
    .unwrap();

    let baseline = migrator.baseline().await.unwrap();
    assert_eq!(baseline.version.to_string(), "1");
    let outcome = migrator.migrate().await.unwrap();
    assert_eq!(outcome.initial_version.map(|v| v.to_string()), Some("1".to_string()));
    assert_eq!(outcome.migrations_executed, 2);

    source.remove("V2__add.sql");
    let err = migrator.validate().await.unwrap_err();
    assert!(matches!(err, MigrationError::Validation(ref errors) if errors.len() == 1));

    let repaired = migrator.repair().await.unwrap();
    assert_eq!(repaired.deleted, vec!["2".to_string()]);
    migrator.validate().await.unwrap();

    let types: Vec<MigrationType> = history.rows().iter().map(|r| r.migration_type).collect();
    assert_eq!(
        types,
        vec![
            MigrationType::Baseline,
            MigrationType::Sql,
            MigrationType::Sql,
            MigrationType::Delete,
        ]
    );
}
