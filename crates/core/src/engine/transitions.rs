use chrono::{DateTime, Utc};

use crate::domain::member::MemberId;
use crate::domain::request::{CompletionOutcome, PromotionRequest, RequestStatus};
use crate::domain::step::{ApprovalStep, StepId, StepStatus};
use crate::errors::WorkflowError;
use crate::notify::TransitionKind;
use crate::policy::JustificationPolicy;
use crate::queries::current_step;
use crate::store::SubjectRoleEffect;

/// The writes one accepted action produces. The engine turns this into a
/// guarded [`crate::store::TransitionWrite`]; nothing here has touched the
/// store yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionDecision {
    pub request: PromotionRequest,
    pub step: Option<ApprovalStep>,
    pub subject_role: Option<SubjectRoleEffect>,
    pub kind: TransitionKind,
}

struct EscalationStamp {
    actor_id: MemberId,
    justification: String,
}

fn ensure_pending_approval(request: &PromotionRequest) -> Result<(), WorkflowError> {
    if request.status != RequestStatus::PendingApproval {
        return Err(WorkflowError::InvalidState {
            request_id: request.id.clone(),
            status: request.status,
        });
    }
    Ok(())
}

/// Finds the targeted step and checks it is the chain's current one. A
/// decided target reports `StepAlreadyDecided` so a racing approver learns
/// the step was taken, not merely that the chain moved on.
fn locate_current<'a>(
    request: &PromotionRequest,
    steps: &'a [ApprovalStep],
    step_id: &StepId,
) -> Result<&'a ApprovalStep, WorkflowError> {
    let target = steps
        .iter()
        .find(|step| step.id == *step_id)
        .ok_or_else(|| WorkflowError::UnknownStep(step_id.clone()))?;

    let current = current_step(steps).ok_or_else(|| WorkflowError::InvalidState {
        request_id: request.id.clone(),
        status: request.status,
    })?;

    if target.id != current.id {
        if target.is_decided() {
            return Err(WorkflowError::StepAlreadyDecided(step_id.clone()));
        }
        return Err(WorkflowError::NotCurrentStep(step_id.clone()));
    }

    Ok(current)
}

fn ensure_nominal_approver(
    current: &ApprovalStep,
    actor_id: &MemberId,
) -> Result<(), WorkflowError> {
    match &current.approver_actor_id {
        None => Err(WorkflowError::VacantApprover(current.id.clone())),
        Some(nominal) if nominal != actor_id => {
            Err(WorkflowError::NotEligibleApprover(actor_id.clone()))
        }
        Some(_) => Ok(()),
    }
}

fn approve_current(
    request: &PromotionRequest,
    steps: &[ApprovalStep],
    current: &ApprovalStep,
    now: DateTime<Utc>,
    escalation: Option<EscalationStamp>,
) -> TransitionDecision {
    let kind =
        if escalation.is_some() { TransitionKind::Escalated } else { TransitionKind::Approved };

    let mut step = current.clone();
    step.status = StepStatus::Approved;
    step.decided_at = Some(now);
    if let Some(stamp) = escalation {
        step.decided_by_escalation = true;
        step.escalation_actor_id = Some(stamp.actor_id);
        step.escalation_justification = Some(stamp.justification);
    }

    let remaining_pending = steps
        .iter()
        .filter(|candidate| candidate.status == StepStatus::Pending && candidate.id != current.id)
        .count();

    let mut request = request.clone();
    request.updated_at = now;

    let subject_role = if remaining_pending == 0 {
        request.status = RequestStatus::Active;
        request.decided_at = Some(now);
        Some(SubjectRoleEffect::Set(request.target_role_id.clone()))
    } else {
        None
    };

    TransitionDecision { request, step: Some(step), subject_role, kind }
}

pub fn decide_approve(
    request: &PromotionRequest,
    steps: &[ApprovalStep],
    step_id: &StepId,
    actor_id: &MemberId,
    now: DateTime<Utc>,
) -> Result<TransitionDecision, WorkflowError> {
    ensure_pending_approval(request)?;
    let current = locate_current(request, steps, step_id)?;
    ensure_nominal_approver(current, actor_id)?;

    Ok(approve_current(request, steps, current, now, None))
}

pub fn decide_reject(
    request: &PromotionRequest,
    steps: &[ApprovalStep],
    step_id: &StepId,
    actor_id: &MemberId,
    reason: &str,
    policy: &JustificationPolicy,
    now: DateTime<Utc>,
) -> Result<TransitionDecision, WorkflowError> {
    ensure_pending_approval(request)?;
    let current = locate_current(request, steps, step_id)?;
    ensure_nominal_approver(current, actor_id)?;
    policy.check(reason)?;

    let mut step = current.clone();
    step.status = StepStatus::Rejected;
    step.decided_at = Some(now);
    step.rejection_reason = Some(reason.trim().to_string());

    // Rejection short-circuits the whole chain; remaining steps stay Pending
    // for audit but become inert once the request turns terminal.
    let mut request = request.clone();
    request.status = RequestStatus::Rejected;
    request.decided_at = Some(now);
    request.updated_at = now;

    Ok(TransitionDecision {
        request,
        step: Some(step),
        subject_role: Some(SubjectRoleEffect::Clear),
        kind: TransitionKind::Rejected,
    })
}

pub fn decide_escalate(
    request: &PromotionRequest,
    steps: &[ApprovalStep],
    step_id: &StepId,
    actor_id: &MemberId,
    justification: &str,
    actor_is_regional_director: bool,
    policy: &JustificationPolicy,
    now: DateTime<Utc>,
) -> Result<TransitionDecision, WorkflowError> {
    ensure_pending_approval(request)?;
    let current = locate_current(request, steps, step_id)?;

    // The nominal approver has the ordinary path; escalation is reserved for
    // a director substituting for someone else.
    if current.approver_actor_id.as_ref() == Some(actor_id) {
        return Err(WorkflowError::NotEligibleApprover(actor_id.clone()));
    }
    if !actor_is_regional_director {
        return Err(WorkflowError::NotEligibleApprover(actor_id.clone()));
    }
    policy.check(justification)?;

    let stamp = EscalationStamp {
        actor_id: actor_id.clone(),
        justification: justification.trim().to_string(),
    };
    Ok(approve_current(request, steps, current, now, Some(stamp)))
}

pub fn decide_cancel(
    request: &PromotionRequest,
    justification: &str,
    policy: &JustificationPolicy,
    now: DateTime<Utc>,
) -> Result<TransitionDecision, WorkflowError> {
    if !request.can_transition_to(&RequestStatus::Cancelled) {
        return Err(WorkflowError::InvalidState {
            request_id: request.id.clone(),
            status: request.status,
        });
    }
    policy.check(justification)?;

    let mut request = request.clone();
    request.status = RequestStatus::Cancelled;
    request.decided_at = Some(now);
    request.closing_note = Some(justification.trim().to_string());
    request.updated_at = now;

    Ok(TransitionDecision {
        request,
        step: None,
        subject_role: Some(SubjectRoleEffect::Clear),
        kind: TransitionKind::Cancelled,
    })
}

pub fn decide_complete(
    request: &PromotionRequest,
    outcome: CompletionOutcome,
    observation: Option<&str>,
    policy: &JustificationPolicy,
    now: DateTime<Utc>,
) -> Result<TransitionDecision, WorkflowError> {
    if !request.can_transition_to(&RequestStatus::Completed(outcome)) {
        return Err(WorkflowError::InvalidState {
            request_id: request.id.clone(),
            status: request.status,
        });
    }

    if outcome.requires_observation() {
        policy.check(observation.unwrap_or(""))?;
    }

    let mut request = request.clone();
    request.status = RequestStatus::Completed(outcome);
    request.closing_note = observation.map(|text| text.trim().to_string());
    request.updated_at = now;

    Ok(TransitionDecision {
        request,
        step: None,
        subject_role: Some(SubjectRoleEffect::Clear),
        kind: TransitionKind::Completed,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{
        decide_approve, decide_cancel, decide_complete, decide_escalate, decide_reject,
    };
    use crate::domain::member::{MemberId, RoleId, SubjectSnapshot, UnitId};
    use crate::domain::request::{
        CompletionOutcome, PromotionRequest, RequestId, RequestStatus, Schedule,
    };
    use crate::domain::step::{ApprovalStep, ApproverRole, StepId, StepStatus, TargetTier};
    use crate::errors::WorkflowError;
    use crate::notify::TransitionKind;
    use crate::policy::JustificationPolicy;
    use crate::store::SubjectRoleEffect;

    const LONG_REASON: &str = "the candidate has not yet completed the required field training";

    fn policy() -> JustificationPolicy {
        JustificationPolicy::default()
    }

    fn request(status: RequestStatus) -> PromotionRequest {
        let now = Utc::now();
        PromotionRequest {
            id: RequestId("req-1".to_string()),
            subject_id: MemberId("m-ana".to_string()),
            subject: SubjectSnapshot {
                name: "Ana Oliveira".to_string(),
                unit_id: UnitId("unit-07".to_string()),
                regional_unit_id: UnitId("reg-north".to_string()),
                current_role: "member".to_string(),
            },
            target_role_id: RoleId("role-trainee-instructor".to_string()),
            target_tier: TargetTier::MidInternship,
            schedule: Schedule::new(NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date"), 12)
                .expect("valid schedule"),
            requested_by: MemberId("m-sec".to_string()),
            requested_by_name: "Unit Secretary".to_string(),
            status,
            closing_note: None,
            created_at: now,
            decided_at: None,
            updated_at: now,
        }
    }

    fn step(id: &str, level: u8, approver: Option<&str>, status: StepStatus) -> ApprovalStep {
        ApprovalStep {
            id: StepId(id.to_string()),
            request_id: RequestId("req-1".to_string()),
            level,
            approver_role: match level {
                1 => ApproverRole::UnitDirector,
                2 => ApproverRole::RegionalDelegate,
                _ => ApproverRole::RegionalDirector,
            },
            approver_actor_id: approver.map(|actor| MemberId(actor.to_string())),
            status,
            decided_at: None,
            rejection_reason: None,
            decided_by_escalation: false,
            escalation_actor_id: None,
            escalation_justification: None,
        }
    }

    fn three_level_chain() -> Vec<ApprovalStep> {
        vec![
            step("s-1", 1, Some("m-a"), StepStatus::Pending),
            step("s-2", 2, Some("m-b"), StepStatus::Pending),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ]
    }

    #[test]
    fn approving_an_intermediate_step_keeps_the_request_pending() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let decision = decide_approve(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-a".to_string()),
            Utc::now(),
        )
        .expect("level 1 approval");

        let updated = decision.step.expect("step write");
        assert_eq!(updated.status, StepStatus::Approved);
        assert!(updated.decided_at.is_some());
        assert!(!updated.decided_by_escalation);
        assert_eq!(decision.request.status, RequestStatus::PendingApproval);
        assert_eq!(decision.subject_role, None);
        assert_eq!(decision.kind, TransitionKind::Approved);
    }

    #[test]
    fn approving_the_last_step_activates_and_grants_the_role() {
        let request = request(RequestStatus::PendingApproval);
        let steps = vec![
            step("s-1", 1, Some("m-a"), StepStatus::Approved),
            step("s-2", 2, Some("m-b"), StepStatus::Approved),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ];

        let decision = decide_approve(
            &request,
            &steps,
            &StepId("s-3".to_string()),
            &MemberId("m-c".to_string()),
            Utc::now(),
        )
        .expect("final approval");

        assert_eq!(decision.request.status, RequestStatus::Active);
        assert!(decision.request.decided_at.is_some());
        assert_eq!(
            decision.subject_role,
            Some(SubjectRoleEffect::Set(RoleId("role-trainee-instructor".to_string())))
        );
    }

    #[test]
    fn approving_a_later_step_out_of_order_is_not_current() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let error = decide_approve(
            &request,
            &steps,
            &StepId("s-2".to_string()),
            &MemberId("m-b".to_string()),
            Utc::now(),
        )
        .expect_err("level 2 is not current yet");

        assert_eq!(error, WorkflowError::NotCurrentStep(StepId("s-2".to_string())));
    }

    #[test]
    fn approving_a_decided_step_reports_already_decided() {
        let request = request(RequestStatus::PendingApproval);
        let steps = vec![
            step("s-1", 1, Some("m-a"), StepStatus::Approved),
            step("s-2", 2, Some("m-b"), StepStatus::Pending),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ];

        let error = decide_approve(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-a".to_string()),
            Utc::now(),
        )
        .expect_err("step one was already decided");

        assert_eq!(error, WorkflowError::StepAlreadyDecided(StepId("s-1".to_string())));
    }

    #[test]
    fn wrong_actor_is_not_eligible() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let error = decide_approve(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-impostor".to_string()),
            Utc::now(),
        )
        .expect_err("only the nominal approver may approve");

        assert_eq!(error, WorkflowError::NotEligibleApprover(MemberId("m-impostor".to_string())));
    }

    #[test]
    fn vacant_current_step_cannot_be_plainly_approved() {
        let request = request(RequestStatus::PendingApproval);
        let steps = vec![
            step("s-1", 1, None, StepStatus::Pending),
            step("s-2", 2, Some("m-b"), StepStatus::Pending),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ];

        let error = decide_approve(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-anyone".to_string()),
            Utc::now(),
        )
        .expect_err("vacant seats have no ordinary approval path");

        assert_eq!(error, WorkflowError::VacantApprover(StepId("s-1".to_string())));
    }

    #[test]
    fn approve_on_terminal_request_is_invalid_state() {
        let request = request(RequestStatus::Rejected);
        let steps = three_level_chain();

        let error = decide_approve(
            &request,
            &steps,
            &StepId("s-3".to_string()),
            &MemberId("m-c".to_string()),
            Utc::now(),
        )
        .expect_err("terminal requests accept no decisions");

        assert!(matches!(error, WorkflowError::InvalidState { .. }));
    }

    #[test]
    fn reject_short_circuits_and_leaves_later_steps_pending() {
        let request = request(RequestStatus::PendingApproval);
        let steps = vec![
            step("s-1", 1, Some("m-a"), StepStatus::Approved),
            step("s-2", 2, Some("m-b"), StepStatus::Pending),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ];

        let reason = "a".repeat(40);
        let decision = decide_reject(
            &request,
            &steps,
            &StepId("s-2".to_string()),
            &MemberId("m-b".to_string()),
            &reason,
            &policy(),
            Utc::now(),
        )
        .expect("level 2 rejection");

        assert_eq!(decision.request.status, RequestStatus::Rejected);
        assert_eq!(decision.subject_role, Some(SubjectRoleEffect::Clear));
        let rejected = decision.step.expect("step write");
        assert_eq!(rejected.status, StepStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some(reason.as_str()));
        // only the rejected step is written; level 3 stays untouched
        assert_eq!(rejected.id.0, "s-2");
    }

    #[test]
    fn reject_requires_a_long_enough_reason() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let error = decide_reject(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-a".to_string()),
            "too short",
            &policy(),
            Utc::now(),
        )
        .expect_err("short reason must fail");

        assert!(matches!(error, WorkflowError::JustificationTooShort { .. }));
    }

    #[test]
    fn escalation_approves_for_a_vacant_seat_and_stamps_the_actor() {
        let request = request(RequestStatus::PendingApproval);
        let steps = vec![
            step("s-1", 1, None, StepStatus::Pending),
            step("s-2", 2, Some("m-b"), StepStatus::Pending),
            step("s-3", 3, Some("m-c"), StepStatus::Pending),
        ];

        let decision = decide_escalate(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-rd".to_string()),
            LONG_REASON,
            true,
            &policy(),
            Utc::now(),
        )
        .expect("director escalation");

        let escalated = decision.step.expect("step write");
        assert_eq!(escalated.status, StepStatus::Approved);
        assert!(escalated.decided_by_escalation);
        assert_eq!(escalated.escalation_actor_id, Some(MemberId("m-rd".to_string())));
        assert_eq!(escalated.escalation_justification.as_deref(), Some(LONG_REASON));
        assert_eq!(decision.request.status, RequestStatus::PendingApproval);
        assert_eq!(decision.kind, TransitionKind::Escalated);
    }

    #[test]
    fn nominal_approver_must_use_the_ordinary_path() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let error = decide_escalate(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-a".to_string()),
            LONG_REASON,
            true,
            &policy(),
            Utc::now(),
        )
        .expect_err("nominal approver cannot escalate their own step");

        assert_eq!(error, WorkflowError::NotEligibleApprover(MemberId("m-a".to_string())));
    }

    #[test]
    fn non_director_cannot_escalate() {
        let request = request(RequestStatus::PendingApproval);
        let steps = three_level_chain();

        let error = decide_escalate(
            &request,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-b".to_string()),
            LONG_REASON,
            false,
            &policy(),
            Utc::now(),
        )
        .expect_err("only a regional director may escalate");

        assert_eq!(error, WorkflowError::NotEligibleApprover(MemberId("m-b".to_string())));
    }

    #[test]
    fn cancel_freezes_steps_and_clears_the_subject_reference() {
        let request = request(RequestStatus::PendingApproval);

        let justification = "submitted against the wrong target role, resubmitting";
        let decision = decide_cancel(&request, justification, &policy(), Utc::now())
            .expect("cancellation");

        assert_eq!(decision.request.status, RequestStatus::Cancelled);
        assert_eq!(decision.request.closing_note.as_deref(), Some(justification));
        assert_eq!(decision.step, None);
        assert_eq!(decision.subject_role, Some(SubjectRoleEffect::Clear));
    }

    #[test]
    fn cancel_is_invalid_once_the_probation_is_active() {
        let request = request(RequestStatus::Active);

        let error = decide_cancel(&request, LONG_REASON, &policy(), Utc::now())
            .expect_err("active probations cannot be cancelled");

        assert!(matches!(error, WorkflowError::InvalidState { .. }));
    }

    #[test]
    fn credited_completion_needs_no_observation() {
        let request = request(RequestStatus::Active);

        let decision = decide_complete(
            &request,
            CompletionOutcome::CompletedWithCredit,
            None,
            &policy(),
            Utc::now(),
        )
        .expect("credited completion");

        assert_eq!(
            decision.request.status,
            RequestStatus::Completed(CompletionOutcome::CompletedWithCredit)
        );
        assert_eq!(decision.subject_role, Some(SubjectRoleEffect::Clear));
    }

    #[test]
    fn non_credit_outcomes_gate_on_the_observation() {
        let request = request(RequestStatus::Active);

        let error = decide_complete(
            &request,
            CompletionOutcome::CompletedWithoutCredit,
            None,
            &policy(),
            Utc::now(),
        )
        .expect_err("missing observation must fail");
        assert!(matches!(error, WorkflowError::JustificationTooShort { length: 0, .. }));

        let decision = decide_complete(
            &request,
            CompletionOutcome::CompletedWithoutCredit,
            Some(LONG_REASON),
            &policy(),
            Utc::now(),
        )
        .expect("observation at policy length");
        assert_eq!(decision.request.closing_note.as_deref(), Some(LONG_REASON));
    }

    #[test]
    fn complete_is_invalid_while_still_pending() {
        let request = request(RequestStatus::PendingApproval);

        let error = decide_complete(
            &request,
            CompletionOutcome::CompletedWithCredit,
            None,
            &policy(),
            Utc::now(),
        )
        .expect_err("pending requests cannot complete");

        assert!(matches!(error, WorkflowError::InvalidState { .. }));
    }

    // The worked example: A approves level 1, B rejects level 2 with a
    // 40-character reason, C's level 3 stays pending forever and any further
    // decision on it is refused.
    #[test]
    fn tier_b_example_runs_to_an_inert_rejected_chain() {
        let request_pending = request(RequestStatus::PendingApproval);
        let mut steps = three_level_chain();

        let first = decide_approve(
            &request_pending,
            &steps,
            &StepId("s-1".to_string()),
            &MemberId("m-a".to_string()),
            Utc::now(),
        )
        .expect("A approves level 1");
        steps[0] = first.step.expect("level 1 write");
        assert_eq!(first.request.status, RequestStatus::PendingApproval);

        let reason = "b".repeat(40);
        let second = decide_reject(
            &first.request,
            &steps,
            &StepId("s-2".to_string()),
            &MemberId("m-b".to_string()),
            &reason,
            &policy(),
            Utc::now(),
        )
        .expect("B rejects level 2");
        steps[1] = second.step.expect("level 2 write");
        assert_eq!(second.request.status, RequestStatus::Rejected);
        assert_eq!(steps[2].status, StepStatus::Pending);

        let error = decide_approve(
            &second.request,
            &steps,
            &StepId("s-3".to_string()),
            &MemberId("m-c".to_string()),
            Utc::now(),
        )
        .expect_err("the rejected request is terminal");
        assert!(matches!(error, WorkflowError::InvalidState { .. }));
    }
}
