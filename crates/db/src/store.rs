use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use probatio_core::domain::member::{MemberId, RoleId, SubjectSnapshot, UnitId};
use probatio_core::domain::request::{
    CompletionOutcome, PromotionRequest, RequestId, RequestStatus, Schedule,
};
use probatio_core::domain::step::{ApprovalStep, ApproverRole, StepId, StepStatus};
use probatio_core::store::{
    RequestRecord, RequestStore, StoreError, SubjectRoleEffect, TransitionWrite,
};

use crate::DbPool;

/// SQLite-backed [`RequestStore`]. Every transition is one transaction whose
/// `UPDATE`s are guarded by the expected prior status; a guard that matches
/// zero rows surfaces as [`StoreError::Conflict`], which is how concurrent
/// actors serialize.
#[derive(Clone)]
pub struct SqlRequestStore {
    pool: DbPool,
}

impl SqlRequestStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Reads the subject's provisional role reference, for verification
    /// tooling and tests.
    pub async fn active_training_role(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<RoleId>, StoreError> {
        let row = sqlx::query("SELECT active_training_role_id FROM member WHERE id = ?")
            .bind(&member_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };
        let role: Option<String> =
            row.try_get("active_training_role_id").map_err(decode_err)?;
        Ok(role.map(RoleId))
    }

    async fn load_record(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, subject_id, subject_name, subject_unit_id, subject_regional_unit_id,
                    subject_current_role, target_role_id, target_tier, start_date,
                    duration_months, expected_end_date, requested_by, requested_by_name,
                    status, outcome, closing_note, created_at, decided_at, updated_at
             FROM promotion_request WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let request = row_to_request(&row)?;

        let step_rows = sqlx::query(
            "SELECT id, request_id, level, approver_role, approver_actor_id, status,
                    decided_at, rejection_reason, decided_by_escalation, escalation_actor_id,
                    escalation_justification
             FROM approval_step WHERE request_id = ? ORDER BY level ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let steps =
            step_rows.iter().map(row_to_step).collect::<Result<Vec<ApprovalStep>, _>>()?;

        Ok(Some(RequestRecord { request, steps }))
    }
}

#[async_trait]
impl RequestStore for SqlRequestStore {
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let open: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM promotion_request
             WHERE subject_id = ? AND status IN ('pending_approval', 'active')",
        )
        .bind(&record.request.subject_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?
        .try_get("count")
        .map_err(decode_err)?;

        if open > 0 {
            return Err(StoreError::DuplicateOpenRequest);
        }

        let request = &record.request;
        sqlx::query(
            "INSERT INTO promotion_request (
                 id, subject_id, subject_name, subject_unit_id, subject_regional_unit_id,
                 subject_current_role, target_role_id, target_tier, start_date,
                 duration_months, expected_end_date, requested_by, requested_by_name,
                 status, outcome, closing_note, created_at, decided_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.subject_id.0)
        .bind(&request.subject.name)
        .bind(&request.subject.unit_id.0)
        .bind(&request.subject.regional_unit_id.0)
        .bind(&request.subject.current_role)
        .bind(&request.target_role_id.0)
        .bind(request.target_tier.as_str())
        .bind(request.schedule.start_date.to_string())
        .bind(i64::from(request.schedule.duration_months))
        .bind(request.schedule.expected_end_date.to_string())
        .bind(&request.requested_by.0)
        .bind(&request.requested_by_name)
        .bind(request_status_as_str(&request.status))
        .bind(outcome_as_str(&request.status))
        .bind(&request.closing_note)
        .bind(request.created_at.to_rfc3339())
        .bind(request.decided_at.map(|stamp| stamp.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(insert_err)?;

        for step in &record.steps {
            sqlx::query(
                "INSERT INTO approval_step (
                     id, request_id, level, approver_role, approver_actor_id, status,
                     decided_at, rejection_reason, decided_by_escalation, escalation_actor_id,
                     escalation_justification
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&step.request_id.0)
            .bind(i64::from(step.level))
            .bind(step.approver_role.as_str())
            .bind(step.approver_actor_id.as_ref().map(|actor| actor.0.clone()))
            .bind(step_status_as_str(&step.status))
            .bind(step.decided_at.map(|stamp| stamp.to_rfc3339()))
            .bind(&step.rejection_reason)
            .bind(step.decided_by_escalation)
            .bind(step.escalation_actor_id.as_ref().map(|actor| actor.0.clone()))
            .bind(&step.escalation_justification)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)
    }

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError> {
        self.load_record(id).await
    }

    async fn load_request_by_step(
        &self,
        step_id: &StepId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let row = sqlx::query("SELECT request_id FROM approval_step WHERE id = ?")
            .bind(&step_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let request_id: String = row.try_get("request_id").map_err(decode_err)?;
        self.load_record(&RequestId(request_id)).await
    }

    async fn commit_transition(&self, write: &TransitionWrite) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some(step) = &write.step {
            let result = sqlx::query(
                "UPDATE approval_step
                 SET status = ?, decided_at = ?, rejection_reason = ?,
                     decided_by_escalation = ?, escalation_actor_id = ?,
                     escalation_justification = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(step_status_as_str(&step.status))
            .bind(step.decided_at.map(|stamp| stamp.to_rfc3339()))
            .bind(&step.rejection_reason)
            .bind(step.decided_by_escalation)
            .bind(step.escalation_actor_id.as_ref().map(|actor| actor.0.clone()))
            .bind(&step.escalation_justification)
            .bind(&step.id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() != 1 {
                return Err(StoreError::Conflict);
            }
        }

        let request = &write.request;
        let result = sqlx::query(
            "UPDATE promotion_request
             SET status = ?, outcome = ?, closing_note = ?, decided_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(request_status_as_str(&request.status))
        .bind(outcome_as_str(&request.status))
        .bind(&request.closing_note)
        .bind(request.decided_at.map(|stamp| stamp.to_rfc3339()))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(request_status_as_str(&write.expected_request_status))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() != 1 {
            let exists: i64 =
                sqlx::query("SELECT COUNT(*) AS count FROM promotion_request WHERE id = ?")
                    .bind(&request.id.0)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .try_get("count")
                    .map_err(decode_err)?;
            return Err(if exists == 0 { StoreError::NotFound } else { StoreError::Conflict });
        }

        if let Some(effect) = &write.subject_role {
            let role = match effect {
                SubjectRoleEffect::Set(role) => Some(role.0.clone()),
                SubjectRoleEffect::Clear => None,
            };
            let result = sqlx::query(
                "UPDATE member SET active_training_role_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(role)
            .bind(request.updated_at.to_rfc3339())
            .bind(&request.subject_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() != 1 {
                return Err(StoreError::NotFound);
            }
        }

        tx.commit().await.map_err(db_err)
    }

    async fn list_pending(&self) -> Result<Vec<RequestRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM promotion_request
             WHERE status = 'pending_approval'
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(decode_err)?;
            if let Some(record) = self.load_record(&RequestId(id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn db_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("decode error: {error}"))
}

fn insert_err(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.message().contains("idx_promotion_request_open_subject") {
            return StoreError::DuplicateOpenRequest;
        }
    }
    db_err(error)
}

pub fn request_status_as_str(status: &RequestStatus) -> &'static str {
    match status {
        RequestStatus::PendingApproval => "pending_approval",
        RequestStatus::Active => "active",
        RequestStatus::Rejected => "rejected",
        RequestStatus::Cancelled => "cancelled",
        RequestStatus::Completed(_) => "completed",
    }
}

fn outcome_as_str(status: &RequestStatus) -> Option<&'static str> {
    match status {
        RequestStatus::Completed(outcome) => Some(outcome.as_str()),
        _ => None,
    }
}

fn parse_request_status(
    status: &str,
    outcome: Option<&str>,
) -> Result<RequestStatus, StoreError> {
    match status {
        "pending_approval" => Ok(RequestStatus::PendingApproval),
        "active" => Ok(RequestStatus::Active),
        "rejected" => Ok(RequestStatus::Rejected),
        "cancelled" => Ok(RequestStatus::Cancelled),
        "completed" => {
            let raw = outcome.ok_or_else(|| {
                StoreError::Backend("completed request without an outcome".to_string())
            })?;
            let outcome = raw
                .parse::<CompletionOutcome>()
                .map_err(|error| StoreError::Backend(format!("decode error: {error}")))?;
            Ok(RequestStatus::Completed(outcome))
        }
        other => Err(StoreError::Backend(format!("unknown request status `{other}`"))),
    }
}

pub fn step_status_as_str(status: &StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Approved => "approved",
        StepStatus::Rejected => "rejected",
    }
}

fn parse_step_status(status: &str) -> Result<StepStatus, StoreError> {
    match status {
        "pending" => Ok(StepStatus::Pending),
        "approved" => Ok(StepStatus::Approved),
        "rejected" => Ok(StepStatus::Rejected),
        other => Err(StoreError::Backend(format!("unknown step status `{other}`"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|stamp| stamp.with_timezone(&Utc))
        .map_err(|error| StoreError::Backend(format!("decode error: {error}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    raw.parse::<NaiveDate>()
        .map_err(|error| StoreError::Backend(format!("decode error: {error}")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<PromotionRequest, StoreError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let subject_id: String = row.try_get("subject_id").map_err(decode_err)?;
    let subject_name: String = row.try_get("subject_name").map_err(decode_err)?;
    let subject_unit_id: String = row.try_get("subject_unit_id").map_err(decode_err)?;
    let subject_regional_unit_id: String =
        row.try_get("subject_regional_unit_id").map_err(decode_err)?;
    let subject_current_role: String =
        row.try_get("subject_current_role").map_err(decode_err)?;
    let target_role_id: String = row.try_get("target_role_id").map_err(decode_err)?;
    let target_tier: String = row.try_get("target_tier").map_err(decode_err)?;
    let start_date: String = row.try_get("start_date").map_err(decode_err)?;
    let duration_months: i64 = row.try_get("duration_months").map_err(decode_err)?;
    let expected_end_date: String = row.try_get("expected_end_date").map_err(decode_err)?;
    let requested_by: String = row.try_get("requested_by").map_err(decode_err)?;
    let requested_by_name: String = row.try_get("requested_by_name").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let outcome: Option<String> = row.try_get("outcome").map_err(decode_err)?;
    let closing_note: Option<String> = row.try_get("closing_note").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    Ok(PromotionRequest {
        id: RequestId(id),
        subject_id: MemberId(subject_id),
        subject: SubjectSnapshot {
            name: subject_name,
            unit_id: UnitId(subject_unit_id),
            regional_unit_id: UnitId(subject_regional_unit_id),
            current_role: subject_current_role,
        },
        target_role_id: RoleId(target_role_id),
        target_tier: target_tier
            .parse()
            .map_err(|error| StoreError::Backend(format!("decode error: {error}")))?,
        schedule: Schedule {
            start_date: parse_date(&start_date)?,
            duration_months: duration_months as u32,
            expected_end_date: parse_date(&expected_end_date)?,
        },
        requested_by: MemberId(requested_by),
        requested_by_name,
        status: parse_request_status(&status, outcome.as_deref())?,
        closing_note,
        created_at: parse_timestamp(&created_at)?,
        decided_at: decided_at.as_deref().map(parse_timestamp).transpose()?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStep, StoreError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let request_id: String = row.try_get("request_id").map_err(decode_err)?;
    let level: i64 = row.try_get("level").map_err(decode_err)?;
    let approver_role: String = row.try_get("approver_role").map_err(decode_err)?;
    let approver_actor_id: Option<String> =
        row.try_get("approver_actor_id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let decided_at: Option<String> = row.try_get("decided_at").map_err(decode_err)?;
    let rejection_reason: Option<String> =
        row.try_get("rejection_reason").map_err(decode_err)?;
    let decided_by_escalation: bool =
        row.try_get("decided_by_escalation").map_err(decode_err)?;
    let escalation_actor_id: Option<String> =
        row.try_get("escalation_actor_id").map_err(decode_err)?;
    let escalation_justification: Option<String> =
        row.try_get("escalation_justification").map_err(decode_err)?;

    let approver_role: ApproverRole = approver_role
        .parse()
        .map_err(|error| StoreError::Backend(format!("decode error: {error}")))?;

    Ok(ApprovalStep {
        id: StepId(id),
        request_id: RequestId(request_id),
        level: level as u8,
        approver_role,
        approver_actor_id: approver_actor_id.map(MemberId),
        status: parse_step_status(&status)?,
        decided_at: decided_at.as_deref().map(parse_timestamp).transpose()?,
        rejection_reason,
        decided_by_escalation,
        escalation_actor_id: escalation_actor_id.map(MemberId),
        escalation_justification,
    })
}
