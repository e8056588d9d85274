use sqlx::{Executor, Row};

use crate::connection::DbPool;

/// Deterministic demo dataset: one region, two units, the full approver
/// ladder, and one mid-tier request already past its first approval. Powers
/// `probatio seed` and the smoke chain walk.
pub struct DemoSeedDataset;

pub struct SeedResult {
    pub members_seeded: i64,
    pub demo_request_id: &'static str,
}

pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl DemoSeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// The subject of the pre-seeded in-flight request.
    pub const DEMO_REQUEST_ID: &'static str = "req-demo-001";

    /// A subject with no open request, free for submission flows.
    pub const FREE_SUBJECT_ID: &'static str = "m-ana";

    pub async fn load(pool: &DbPool) -> Result<SeedResult, sqlx::Error> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let members_seeded: i64 = sqlx::query("SELECT COUNT(*) AS count FROM member")
            .fetch_one(pool)
            .await?
            .try_get("count")?;

        Ok(SeedResult { members_seeded, demo_request_id: Self::DEMO_REQUEST_ID })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, sqlx::Error> {
        let mut checks = Vec::new();

        let members: i64 = sqlx::query("SELECT COUNT(*) AS count FROM member")
            .fetch_one(pool)
            .await?
            .try_get("count")?;
        checks.push(("members", members >= 7));

        let seats: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM member WHERE directory_role IS NOT NULL",
        )
        .fetch_one(pool)
        .await?
        .try_get("count")?;
        checks.push(("directory-seats", seats >= 4));

        let pending: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM promotion_request
             WHERE id = ? AND status = 'pending_approval'",
        )
        .bind(Self::DEMO_REQUEST_ID)
        .fetch_one(pool)
        .await?
        .try_get("count")?;
        checks.push(("demo-request-pending", pending == 1));

        let chain: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM approval_step WHERE request_id = ?",
        )
        .bind(Self::DEMO_REQUEST_ID)
        .fetch_one(pool)
        .await?
        .try_get("count")?;
        checks.push(("demo-chain-complete", chain == 3));

        let current: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM approval_step
             WHERE request_id = ? AND status = 'pending' AND level = 2",
        )
        .bind(Self::DEMO_REQUEST_ID)
        .fetch_one(pool)
        .await?
        .try_get("count")?;
        checks.push(("demo-current-step-is-level-2", current == 1));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}
