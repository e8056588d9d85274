pub mod transitions;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::chain;
use crate::directory::MemberDirectory;
use crate::domain::member::{MemberId, RoleId, SubjectSnapshot};
use crate::domain::request::{
    CompletionOutcome, PromotionRequest, RequestId, RequestStatus, Schedule,
};
use crate::domain::step::{ApprovalStep, StepId, StepStatus, TargetTier};
use crate::errors::WorkflowError;
use crate::notify::{Notification, NotificationSink, TransitionKind};
use crate::policy::JustificationPolicy;
use crate::queries::{self, PendingReview};
use crate::store::{RequestRecord, RequestStore, StoreError, TransitionWrite};
use transitions::TransitionDecision;

/// Everything a caller supplies to open a promotion attempt. The subject and
/// requester snapshots are resolved from the directory at submission time.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub subject_id: MemberId,
    pub target_role_id: RoleId,
    pub target_tier: TargetTier,
    pub start_date: NaiveDate,
    pub duration_months: u32,
    pub requested_by: MemberId,
}

/// The approval state machine. Every mutating operation re-reads persisted
/// state, validates against that fresh read, and commits through the store's
/// guarded transactional write, so concurrent actors serialize instead of
/// overwriting each other.
pub struct PromotionEngine<S, D, N> {
    store: S,
    directory: D,
    notifier: N,
    audit: Arc<dyn AuditSink>,
    policy: JustificationPolicy,
}

impl<S, D, N> PromotionEngine<S, D, N>
where
    S: RequestStore,
    D: MemberDirectory,
    N: NotificationSink,
{
    pub fn new(store: S, directory: D, notifier: N, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, directory, notifier, audit, policy: JustificationPolicy::default() }
    }

    pub fn with_policy(mut self, policy: JustificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn submit_request(
        &self,
        new_request: NewRequest,
    ) -> Result<RequestRecord, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();

        let profile = self
            .directory
            .find_member(&new_request.subject_id)
            .await
            .map_err(|error| WorkflowError::Directory(error.to_string()))?
            .ok_or_else(|| WorkflowError::UnknownMember(new_request.subject_id.clone()))?;
        let requester = self
            .directory
            .find_member(&new_request.requested_by)
            .await
            .map_err(|error| WorkflowError::Directory(error.to_string()))?
            .ok_or_else(|| WorkflowError::UnknownMember(new_request.requested_by.clone()))?;

        let schedule = Schedule::new(new_request.start_date, new_request.duration_months)?;
        let subject = SubjectSnapshot {
            name: profile.name,
            unit_id: profile.unit_id,
            regional_unit_id: profile.regional_unit_id,
            current_role: profile.current_role,
        };

        let resolved = chain::resolve_chain(&self.directory, new_request.target_tier, &subject)
            .await
            .map_err(|error| WorkflowError::Directory(error.to_string()))?;

        let now = Utc::now();
        let request_id = RequestId(Uuid::new_v4().to_string());
        let steps: Vec<ApprovalStep> = resolved
            .into_iter()
            .enumerate()
            .map(|(index, approver)| ApprovalStep {
                id: StepId(Uuid::new_v4().to_string()),
                request_id: request_id.clone(),
                level: index as u8 + 1,
                approver_role: approver.role,
                approver_actor_id: approver.actor_id,
                status: StepStatus::Pending,
                decided_at: None,
                rejection_reason: None,
                decided_by_escalation: false,
                escalation_actor_id: None,
                escalation_justification: None,
            })
            .collect();

        let record = RequestRecord {
            request: PromotionRequest {
                id: request_id,
                subject_id: new_request.subject_id.clone(),
                subject,
                target_role_id: new_request.target_role_id,
                target_tier: new_request.target_tier,
                schedule,
                requested_by: new_request.requested_by.clone(),
                requested_by_name: requester.name,
                status: RequestStatus::PendingApproval,
                closing_note: None,
                created_at: now,
                decided_at: None,
                updated_at: now,
            },
            steps,
        };

        match self.store.insert_request(&record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateOpenRequest) => {
                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id,
                        "request.submission_refused",
                        AuditCategory::Submission,
                        new_request.requested_by.0.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("subject", new_request.subject_id.0.clone())
                    .with_metadata("error", "duplicate active request"),
                );
                return Err(WorkflowError::DuplicateActiveRequest(new_request.subject_id));
            }
            Err(other) => return Err(WorkflowError::Persistence(other.to_string())),
        }

        self.audit.emit(
            AuditEvent::new(
                Some(record.request.id.clone()),
                correlation_id,
                "request.submitted",
                AuditCategory::Submission,
                new_request.requested_by.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("subject", record.request.subject_id.0.clone())
            .with_metadata("tier", record.request.target_tier.as_str())
            .with_metadata("chain_length", record.steps.len().to_string()),
        );
        tracing::info!(
            event_name = "engine.request_submitted",
            request_id = %record.request.id,
            subject_id = %record.request.subject_id,
            tier = record.request.target_tier.as_str(),
            chain_length = record.steps.len(),
            "promotion request submitted"
        );
        self.dispatch(&record, TransitionKind::Submitted, &new_request.requested_by, None);

        Ok(record)
    }

    pub async fn approve(
        &self,
        step_id: &StepId,
        actor_id: &MemberId,
    ) -> Result<RequestRecord, WorkflowError> {
        let record = self.load_by_step(step_id).await?;
        let decision = transitions::decide_approve(
            &record.request,
            &record.steps,
            step_id,
            actor_id,
            Utc::now(),
        );
        self.commit("step.approved", AuditCategory::Decision, record, decision, actor_id, None)
            .await
    }

    pub async fn reject(
        &self,
        step_id: &StepId,
        actor_id: &MemberId,
        reason: &str,
    ) -> Result<RequestRecord, WorkflowError> {
        let record = self.load_by_step(step_id).await?;
        let decision = transitions::decide_reject(
            &record.request,
            &record.steps,
            step_id,
            actor_id,
            reason,
            &self.policy,
            Utc::now(),
        );
        self.commit(
            "step.rejected",
            AuditCategory::Decision,
            record,
            decision,
            actor_id,
            Some(reason.trim().to_string()),
        )
        .await
    }

    pub async fn escalate_approve(
        &self,
        step_id: &StepId,
        actor_id: &MemberId,
        justification: &str,
    ) -> Result<RequestRecord, WorkflowError> {
        let record = self.load_by_step(step_id).await?;
        let eligible = self
            .directory
            .is_regional_director_of(actor_id, &record.request.subject.regional_unit_id)
            .await
            .map_err(|error| WorkflowError::Directory(error.to_string()))?;
        let decision = transitions::decide_escalate(
            &record.request,
            &record.steps,
            step_id,
            actor_id,
            justification,
            eligible,
            &self.policy,
            Utc::now(),
        );
        self.commit(
            "step.escalation_approved",
            AuditCategory::Decision,
            record,
            decision,
            actor_id,
            Some(justification.trim().to_string()),
        )
        .await
    }

    pub async fn cancel(
        &self,
        request_id: &RequestId,
        actor_id: &MemberId,
        justification: &str,
    ) -> Result<RequestRecord, WorkflowError> {
        let record = self.load_request_record(request_id).await?;
        let decision =
            transitions::decide_cancel(&record.request, justification, &self.policy, Utc::now());
        self.commit(
            "request.cancelled",
            AuditCategory::Lifecycle,
            record,
            decision,
            actor_id,
            Some(justification.trim().to_string()),
        )
        .await
    }

    pub async fn complete(
        &self,
        request_id: &RequestId,
        actor_id: &MemberId,
        outcome: CompletionOutcome,
        observation: Option<&str>,
    ) -> Result<RequestRecord, WorkflowError> {
        let record = self.load_request_record(request_id).await?;
        let decision = transitions::decide_complete(
            &record.request,
            outcome,
            observation,
            &self.policy,
            Utc::now(),
        );
        self.commit(
            "request.completed",
            AuditCategory::Lifecycle,
            record,
            decision,
            actor_id,
            Some(outcome.as_str().to_string()),
        )
        .await
    }

    pub async fn query_pending(
        &self,
        viewer_id: &MemberId,
    ) -> Result<Vec<PendingReview>, WorkflowError> {
        let records = self
            .store
            .list_pending()
            .await
            .map_err(|error| WorkflowError::Persistence(error.to_string()))?;

        let mut reviews = Vec::with_capacity(records.len());
        for record in records {
            let viewer_is_regional_director = self
                .directory
                .is_regional_director_of(viewer_id, &record.request.subject.regional_unit_id)
                .await
                .map_err(|error| WorkflowError::Directory(error.to_string()))?;
            reviews.push(queries::project(record, viewer_id, viewer_is_regional_director));
        }
        Ok(reviews)
    }

    async fn load_by_step(&self, step_id: &StepId) -> Result<RequestRecord, WorkflowError> {
        self.store
            .load_request_by_step(step_id)
            .await
            .map_err(|error| WorkflowError::Persistence(error.to_string()))?
            .ok_or_else(|| WorkflowError::UnknownStep(step_id.clone()))
    }

    async fn load_request_record(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestRecord, WorkflowError> {
        self.store
            .load_request(request_id)
            .await
            .map_err(|error| WorkflowError::Persistence(error.to_string()))?
            .ok_or_else(|| WorkflowError::UnknownRequest(request_id.clone()))
    }

    async fn commit(
        &self,
        event_type: &'static str,
        category: AuditCategory,
        before: RequestRecord,
        decision: Result<TransitionDecision, WorkflowError>,
        actor_id: &MemberId,
        detail: Option<String>,
    ) -> Result<RequestRecord, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();

        let decision = match decision {
            Ok(decision) => decision,
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(before.request.id.clone()),
                        correlation_id,
                        "transition.refused",
                        category,
                        actor_id.0.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
                return Err(error);
            }
        };

        let write = TransitionWrite {
            expected_request_status: before.request.status,
            request: decision.request.clone(),
            step: decision.step.clone(),
            subject_role: decision.subject_role.clone(),
        };

        if let Err(error) = self.store.commit_transition(&write).await {
            let mapped = match error {
                // Another actor committed first; the fresh state decides what
                // the caller is told.
                StoreError::Conflict => match &decision.step {
                    Some(step) => WorkflowError::StepAlreadyDecided(step.id.clone()),
                    None => WorkflowError::InvalidState {
                        request_id: before.request.id.clone(),
                        status: before.request.status,
                    },
                },
                StoreError::NotFound => WorkflowError::UnknownRequest(before.request.id.clone()),
                other => WorkflowError::Persistence(other.to_string()),
            };
            self.audit.emit(
                AuditEvent::new(
                    Some(before.request.id.clone()),
                    correlation_id,
                    "transition.refused",
                    category,
                    actor_id.0.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", mapped.to_string()),
            );
            return Err(mapped);
        }

        let mut steps = before.steps;
        if let Some(updated) = &decision.step {
            if let Some(slot) = steps.iter_mut().find(|step| step.id == updated.id) {
                *slot = updated.clone();
            }
        }
        let after = RequestRecord { request: decision.request, steps };

        self.audit.emit(
            AuditEvent::new(
                Some(after.request.id.clone()),
                correlation_id,
                event_type,
                category,
                actor_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("status", format!("{:?}", after.request.status)),
        );
        tracing::info!(
            event_name = "engine.transition_committed",
            request_id = %after.request.id,
            transition = decision.kind.as_str(),
            status = ?after.request.status,
            "transition committed"
        );
        self.dispatch(&after, decision.kind, actor_id, detail);

        Ok(after)
    }

    fn dispatch(
        &self,
        record: &RequestRecord,
        kind: TransitionKind,
        actor_id: &MemberId,
        detail: Option<String>,
    ) {
        let notification = Notification {
            request_id: record.request.id.clone(),
            kind,
            subject_name: record.request.subject.name.clone(),
            target_role_id: record.request.target_role_id.clone(),
            actor_id: actor_id.clone(),
            detail,
        };
        // Fire-and-forget: a broken channel must never roll back a committed
        // transition.
        if let Err(error) = self.notifier.dispatch(&notification) {
            tracing::warn!(
                event_name = "engine.notification_failed",
                request_id = %record.request.id,
                kind = kind.as_str(),
                error = %error,
                "notification dispatch failed"
            );
        }
    }
}
