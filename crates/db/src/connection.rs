use std::time::Duration;

use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};

use probatio_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the workflow pool from validated configuration.
pub async fn open_pool(settings: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    open_with(&settings.url, settings.max_connections, settings.timeout_secs).await
}

/// Opens a pool with explicit limits. Every connection enforces foreign keys
/// and waits out writer contention instead of failing fast; the store's
/// guarded transactional writes rely on both.
pub async fn open_with(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| Box::pin(async move { prepare_connection(conn).await }))
        .connect(database_url)
        .await
}

async fn prepare_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in [
        "PRAGMA foreign_keys = ON",
        "PRAGMA journal_mode = WAL",
        "PRAGMA synchronous = NORMAL",
        "PRAGMA busy_timeout = 5000",
    ] {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }
    Ok(())
}
