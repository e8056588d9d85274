use async_trait::async_trait;
use sqlx::Row;

use probatio_core::directory::{DirectoryError, MemberDirectory, MemberProfile};
use probatio_core::domain::member::{MemberId, UnitId};
use probatio_core::domain::step::ApproverRole;

use crate::DbPool;

/// [`MemberDirectory`] backed by the `member` table. Unit-level roles are
/// scoped by `unit_id`, regional ones by `regional_unit_id`; with several
/// holders the lowest member id wins so resolution stays deterministic.
#[derive(Clone)]
pub struct SqlMemberDirectory {
    pool: DbPool,
}

impl SqlMemberDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn db_err(error: sqlx::Error) -> DirectoryError {
    DirectoryError::Backend(error.to_string())
}

#[async_trait]
impl MemberDirectory for SqlMemberDirectory {
    async fn find_member(&self, id: &MemberId) -> Result<Option<MemberProfile>, DirectoryError> {
        let row = sqlx::query(
            "SELECT id, full_name, unit_id, regional_unit_id, current_role
             FROM member WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(MemberProfile {
            id: MemberId(row.try_get("id").map_err(db_err)?),
            name: row.try_get("full_name").map_err(db_err)?,
            unit_id: UnitId(row.try_get("unit_id").map_err(db_err)?),
            regional_unit_id: UnitId(row.try_get("regional_unit_id").map_err(db_err)?),
            current_role: row.try_get("current_role").map_err(db_err)?,
        }))
    }

    async fn find_role_holder(
        &self,
        role: ApproverRole,
        scope: &UnitId,
    ) -> Result<Option<MemberId>, DirectoryError> {
        let query = match role {
            ApproverRole::UnitDirector => {
                "SELECT id FROM member
                 WHERE directory_role = ? AND unit_id = ?
                 ORDER BY id ASC LIMIT 1"
            }
            ApproverRole::RegionalDelegate | ApproverRole::RegionalDirector => {
                "SELECT id FROM member
                 WHERE directory_role = ? AND regional_unit_id = ?
                 ORDER BY id ASC LIMIT 1"
            }
        };

        let row = sqlx::query(query)
            .bind(role.as_str())
            .bind(&scope.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(MemberId(row.try_get("id").map_err(db_err)?))),
            None => Ok(None),
        }
    }

    async fn is_regional_director_of(
        &self,
        actor_id: &MemberId,
        regional_unit_id: &UnitId,
    ) -> Result<bool, DirectoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM member
             WHERE id = ? AND directory_role = 'regional_director' AND regional_unit_id = ?",
        )
        .bind(&actor_id.0)
        .bind(&regional_unit_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_get("count")
        .map_err(db_err)?;

        Ok(count > 0)
    }
}
