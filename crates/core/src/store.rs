use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::member::{MemberId, RoleId};
use crate::domain::request::{PromotionRequest, RequestId, RequestStatus};
use crate::domain::step::{ApprovalStep, StepId, StepStatus};

/// A request together with its ordered chain, as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    pub request: PromotionRequest,
    /// Ordered by level, ascending.
    pub steps: Vec<ApprovalStep>,
}

/// The subject-record side effect committed together with a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectRoleEffect {
    Set(RoleId),
    Clear,
}

/// One atomic transition: an optional step decision, the request update, and
/// an optional write to the subject's active-training-role reference. The
/// store must apply all three in a single transaction, re-checking the
/// guards against persisted state: the request must still be in
/// `expected_request_status`, and the step (when present) must still be
/// `Pending`. A failed guard is reported as [`StoreError::Conflict`] so two
/// racing transitions serialize instead of overwriting each other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionWrite {
    pub expected_request_status: RequestStatus,
    pub request: PromotionRequest,
    pub step: Option<ApprovalStep>,
    pub subject_role: Option<SubjectRoleEffect>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("concurrent update conflict")]
    Conflict,
    #[error("subject already has an open promotion request")]
    DuplicateOpenRequest,
    #[error("record not found")]
    NotFound,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Creates the request and its full chain atomically. Fails with
    /// [`StoreError::DuplicateOpenRequest`] when the subject already has a
    /// request in `PendingApproval` or `Active`; the check runs in the same
    /// transaction as the insert.
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), StoreError>;

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError>;

    async fn load_request_by_step(
        &self,
        step_id: &StepId,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn commit_transition(&self, write: &TransitionWrite) -> Result<(), StoreError>;

    async fn list_pending(&self) -> Result<Vec<RequestRecord>, StoreError>;
}

#[async_trait]
impl<T> RequestStore for Arc<T>
where
    T: RequestStore + ?Sized,
{
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        (**self).insert_request(record).await
    }

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError> {
        (**self).load_request(id).await
    }

    async fn load_request_by_step(
        &self,
        step_id: &StepId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        (**self).load_request_by_step(step_id).await
    }

    async fn commit_transition(&self, write: &TransitionWrite) -> Result<(), StoreError> {
        (**self).commit_transition(write).await
    }

    async fn list_pending(&self) -> Result<Vec<RequestRecord>, StoreError> {
        (**self).list_pending().await
    }
}

#[derive(Default)]
struct MemoryState {
    requests: HashMap<String, RequestRecord>,
    training_roles: HashMap<String, RoleId>,
}

/// Store fake applying the same guards as the SQL implementation under one
/// lock. Used by engine tests and available to downstream callers that want
/// the workflow without a database.
#[derive(Default)]
pub struct InMemoryRequestStore {
    inner: Mutex<MemoryState>,
}

impl InMemoryRequestStore {
    /// Test observation point for the cross-aggregate side effect.
    pub async fn active_training_role(&self, member_id: &MemberId) -> Option<RoleId> {
        let state = self.inner.lock().await;
        state.training_roles.get(&member_id.0).cloned()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;

        let has_open = state.requests.values().any(|existing| {
            existing.request.subject_id == record.request.subject_id
                && existing.request.status.is_open()
        });
        if has_open {
            return Err(StoreError::DuplicateOpenRequest);
        }

        state.requests.insert(record.request.id.0.clone(), record.clone());
        Ok(())
    }

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn load_request_by_step(
        &self,
        step_id: &StepId,
    ) -> Result<Option<RequestRecord>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .requests
            .values()
            .find(|record| record.steps.iter().any(|step| step.id == *step_id))
            .cloned())
    }

    async fn commit_transition(&self, write: &TransitionWrite) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;

        {
            let record = state
                .requests
                .get_mut(&write.request.id.0)
                .ok_or(StoreError::NotFound)?;

            if record.request.status != write.expected_request_status {
                return Err(StoreError::Conflict);
            }

            if let Some(step) = &write.step {
                let persisted = record
                    .steps
                    .iter_mut()
                    .find(|candidate| candidate.id == step.id)
                    .ok_or(StoreError::NotFound)?;
                if persisted.status != StepStatus::Pending {
                    return Err(StoreError::Conflict);
                }
                *persisted = step.clone();
            }

            record.request = write.request.clone();
        }

        match &write.subject_role {
            Some(SubjectRoleEffect::Set(role)) => {
                state.training_roles.insert(write.request.subject_id.0.clone(), role.clone());
            }
            Some(SubjectRoleEffect::Clear) => {
                state.training_roles.remove(&write.request.subject_id.0);
            }
            None => {}
        }

        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<RequestRecord>, StoreError> {
        let state = self.inner.lock().await;
        let mut pending: Vec<RequestRecord> = state
            .requests
            .values()
            .filter(|record| record.request.status == RequestStatus::PendingApproval)
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.request
                .created_at
                .cmp(&right.request.created_at)
                .then_with(|| left.request.id.0.cmp(&right.request.id.0))
        });
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{
        InMemoryRequestStore, RequestRecord, RequestStore, StoreError, SubjectRoleEffect,
        TransitionWrite,
    };
    use crate::domain::member::{MemberId, RoleId, SubjectSnapshot, UnitId};
    use crate::domain::request::{PromotionRequest, RequestId, RequestStatus, Schedule};
    use crate::domain::step::{ApprovalStep, ApproverRole, StepId, StepStatus, TargetTier};

    fn record(request_id: &str, subject_id: &str, status: RequestStatus) -> RequestRecord {
        let now = Utc::now();
        let request = PromotionRequest {
            id: RequestId(request_id.to_string()),
            subject_id: MemberId(subject_id.to_string()),
            subject: SubjectSnapshot {
                name: "Subject".to_string(),
                unit_id: UnitId("unit-1".to_string()),
                regional_unit_id: UnitId("reg-1".to_string()),
                current_role: "member".to_string(),
            },
            target_role_id: RoleId("role-trainee".to_string()),
            target_tier: TargetTier::SeniorInternship,
            schedule: Schedule::new(
                NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date"),
                6,
            )
            .expect("valid schedule"),
            requested_by: MemberId("m-req".to_string()),
            requested_by_name: "Requester".to_string(),
            status,
            closing_note: None,
            created_at: now,
            decided_at: None,
            updated_at: now,
        };
        let steps = vec![ApprovalStep {
            id: StepId(format!("{request_id}-s1")),
            request_id: request.id.clone(),
            level: 1,
            approver_role: ApproverRole::RegionalDirector,
            approver_actor_id: Some(MemberId("m-rd".to_string())),
            status: StepStatus::Pending,
            decided_at: None,
            rejection_reason: None,
            decided_by_escalation: false,
            escalation_actor_id: None,
            escalation_justification: None,
        }];
        RequestRecord { request, steps }
    }

    #[tokio::test]
    async fn insert_refuses_second_open_request_for_subject() {
        let store = InMemoryRequestStore::default();
        store
            .insert_request(&record("req-1", "m-ana", RequestStatus::PendingApproval))
            .await
            .expect("first insert");

        let error = store
            .insert_request(&record("req-2", "m-ana", RequestStatus::PendingApproval))
            .await
            .expect_err("second open request must fail");
        assert_eq!(error, StoreError::DuplicateOpenRequest);
    }

    #[tokio::test]
    async fn insert_allows_new_request_after_terminal_one() {
        let store = InMemoryRequestStore::default();
        store
            .insert_request(&record("req-1", "m-ana", RequestStatus::Rejected))
            .await
            .expect("terminal insert");
        store
            .insert_request(&record("req-2", "m-ana", RequestStatus::PendingApproval))
            .await
            .expect("open insert after terminal");
    }

    #[tokio::test]
    async fn stale_request_status_guard_reports_conflict() {
        let store = InMemoryRequestStore::default();
        let original = record("req-1", "m-ana", RequestStatus::PendingApproval);
        store.insert_request(&original).await.expect("insert");

        let mut cancelled = original.request.clone();
        cancelled.status = RequestStatus::Cancelled;
        store
            .commit_transition(&TransitionWrite {
                expected_request_status: RequestStatus::PendingApproval,
                request: cancelled.clone(),
                step: None,
                subject_role: Some(SubjectRoleEffect::Clear),
            })
            .await
            .expect("first transition");

        let error = store
            .commit_transition(&TransitionWrite {
                expected_request_status: RequestStatus::PendingApproval,
                request: cancelled,
                step: None,
                subject_role: None,
            })
            .await
            .expect_err("stale guard must conflict");
        assert_eq!(error, StoreError::Conflict);
    }

    #[tokio::test]
    async fn decided_step_guard_reports_conflict() {
        let store = InMemoryRequestStore::default();
        let original = record("req-1", "m-ana", RequestStatus::PendingApproval);
        store.insert_request(&original).await.expect("insert");

        let mut approved_step = original.steps[0].clone();
        approved_step.status = StepStatus::Approved;
        approved_step.decided_at = Some(Utc::now());
        let mut active = original.request.clone();
        active.status = RequestStatus::Active;

        let write = TransitionWrite {
            expected_request_status: RequestStatus::PendingApproval,
            request: active,
            step: Some(approved_step),
            subject_role: Some(SubjectRoleEffect::Set(RoleId("role-trainee".to_string()))),
        };
        store.commit_transition(&write).await.expect("first decision");

        let error = store.commit_transition(&write).await.expect_err("replay must conflict");
        assert_eq!(error, StoreError::Conflict);

        let role = store.active_training_role(&MemberId("m-ana".to_string())).await;
        assert_eq!(role, Some(RoleId("role-trainee".to_string())));
    }

    #[tokio::test]
    async fn list_pending_returns_only_pending_approval() {
        let store = InMemoryRequestStore::default();
        store
            .insert_request(&record("req-1", "m-ana", RequestStatus::PendingApproval))
            .await
            .expect("insert pending");
        store
            .insert_request(&record("req-2", "m-bruno", RequestStatus::Active))
            .await
            .expect("insert active");

        let pending = store.list_pending().await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.id.0, "req-1");
    }
}
