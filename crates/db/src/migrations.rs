use sqlx::migrate::{MigrateError, Migrator};
use sqlx::Row;

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// True when the workflow tables exist; readiness tooling uses this to point
/// operators at `probatio migrate`.
pub async fn schema_is_provisioned(pool: &DbPool) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM sqlite_master
         WHERE type = 'table' AND name = 'promotion_request'",
    )
    .fetch_one(pool)
    .await?
    .try_get("count")?;
    Ok(count == 1)
}
