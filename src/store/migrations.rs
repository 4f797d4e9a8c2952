//! Version-tracked database migrations for the libSQL backend.
//!
//! `_migrations` records every applied version; only newer ones run.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "assessments",
        sql: r#"
            CREATE TABLE IF NOT EXISTS assessments (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                age INTEGER,
                gender TEXT,
                conversation_history TEXT NOT NULL,
                probable_groups TEXT NOT NULL,
                final_focus_group TEXT NOT NULL,
                psychometric_scores TEXT NOT NULL,
                assessment_stage TEXT NOT NULL,
                psych_report TEXT NOT NULL DEFAULT '',
                full_report TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'completed',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_assessments_group_status
                ON assessments(final_focus_group, status);
            CREATE INDEX IF NOT EXISTS idx_assessments_session ON assessments(session_id);
        "#,
    },
    Migration {
        version: 2,
        name: "assessments_created_at_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_assessments_created_at ON assessments(created_at);
        "#,
    },
];

const LEDGER_SQL: &str = "
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    )";

fn migration_err(context: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the newest version.
///
/// Each migration runs in its own transaction together with its ledger row,
/// so a failed step leaves the previous version in place.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(LEDGER_SQL, ())
        .await
        .map_err(migration_err("creating _migrations"))?;

    let applied = current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    let Some(target) = pending.last().map(|m| m.version) else {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    };

    for migration in pending {
        apply(conn, migration).await?;
    }
    tracing::info!(from = applied, to = target, "Schema migrated");
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    tracing::info!(
        version = migration.version,
        name = migration.name,
        "Applying migration"
    );
    let failed = |e: libsql::Error| {
        DatabaseError::Migration(format!(
            "V{} ({}) failed: {e}",
            migration.version, migration.name
        ))
    };

    let tx = conn.transaction().await.map_err(failed)?;
    let result = async {
        tx.execute_batch(migration.sql).await?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await?;
        Ok::<_, libsql::Error>(())
    }
    .await;

    match result {
        Ok(()) => tx.commit().await.map_err(failed),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback after failed migration also failed");
            }
            Err(failed(e))
        }
    }
}

/// Highest recorded version, 0 on a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(migration_err("reading schema version"))?;
    match rows.next().await.map_err(migration_err("reading schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(migration_err("decoding schema version")),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn broken_migration_rolls_back() {
        let conn = test_conn().await;
        conn.execute(LEDGER_SQL, ()).await.unwrap();
        let broken = Migration {
            version: 1,
            name: "broken",
            sql: "CREATE TABLE half_done (id TEXT); INSERT INTO missing_table VALUES (1);",
        };

        let err = apply(&conn, &broken).await.unwrap_err();
        assert!(err.to_string().contains("V1 (broken)"));
        assert_eq!(current_version(&conn).await.unwrap(), 0);

        let mut rows = conn
            .query("SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn migrations_create_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["assessments", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = current_version(&conn).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);

        let mut rows = conn.query("SELECT COUNT(*) FROM _migrations", ()).await.unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn partial_database_applies_only_newer_versions() {
        let conn = test_conn().await;
        conn.execute(LEDGER_SQL, ()).await.unwrap();
        apply(&conn, &MIGRATIONS[0]).await.unwrap();
        assert_eq!(current_version(&conn).await.unwrap(), 1);

        run_migrations(&conn).await.unwrap();
        assert_eq!(current_version(&conn).await.unwrap(), 2);
    }
}
