//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "article_jobs",
    sql: r#"
            CREATE TABLE IF NOT EXISTS article_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT '',
                audience TEXT NOT NULL DEFAULT '',
                author_persona TEXT NOT NULL DEFAULT '',
                angle TEXT NOT NULL DEFAULT '',
                content_goal TEXT NOT NULL DEFAULT '',
                desired_length TEXT NOT NULL DEFAULT '',
                complexity TEXT NOT NULL DEFAULT '',
                constraints TEXT NOT NULL DEFAULT '',
                thread_id TEXT,
                run_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                outline TEXT,
                section_notes TEXT NOT NULL DEFAULT '{}',
                sources TEXT NOT NULL DEFAULT '[]',
                search_results TEXT NOT NULL DEFAULT '[]',
                sections TEXT NOT NULL DEFAULT '[]',
                final_html TEXT,
                seo TEXT,
                seo_run TEXT,
                error_message TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_article_jobs_user ON article_jobs(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_article_jobs_status ON article_jobs(status);
        "#,
}];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        let version = get_current_version(conn).await?;
        tracing::debug!(version = version, "Database migrations complete");
    }
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
