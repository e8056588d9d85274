use serde::Serialize;

use crate::domain::member::MemberId;
use crate::domain::request::PromotionRequest;
use crate::domain::step::{ApprovalStep, StepStatus};
use crate::store::RequestRecord;

/// The current step is always the lowest-level step still `Pending`,
/// recomputed from persisted state on every read.
pub fn current_step(steps: &[ApprovalStep]) -> Option<&ApprovalStep> {
    steps
        .iter()
        .filter(|step| step.status == StepStatus::Pending)
        .min_by_key(|step| step.level)
}

/// What one viewer sees for one pending request. Pure projection; nothing
/// here is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingReview {
    pub request: PromotionRequest,
    pub steps: Vec<ApprovalStep>,
    pub current_step: Option<ApprovalStep>,
    pub is_nominal_approver: bool,
    pub can_escalate: bool,
}

pub fn project(
    record: RequestRecord,
    viewer_id: &MemberId,
    viewer_is_regional_director: bool,
) -> PendingReview {
    let current = current_step(&record.steps).cloned();
    let is_nominal_approver = current
        .as_ref()
        .and_then(|step| step.approver_actor_id.as_ref())
        .is_some_and(|approver| approver == viewer_id);
    let can_escalate = viewer_is_regional_director && current.is_some() && !is_nominal_approver;

    PendingReview {
        current_step: current,
        is_nominal_approver,
        can_escalate,
        request: record.request,
        steps: record.steps,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{current_step, project};
    use crate::domain::member::{MemberId, RoleId, SubjectSnapshot, UnitId};
    use crate::domain::request::{PromotionRequest, RequestId, RequestStatus, Schedule};
    use crate::domain::step::{ApprovalStep, ApproverRole, StepId, StepStatus, TargetTier};
    use crate::store::RequestRecord;

    fn step(id: &str, level: u8, status: StepStatus, approver: Option<&str>) -> ApprovalStep {
        ApprovalStep {
            id: StepId(id.to_string()),
            request_id: RequestId("req-1".to_string()),
            level,
            approver_role: ApproverRole::UnitDirector,
            approver_actor_id: approver.map(|actor| MemberId(actor.to_string())),
            status,
            decided_at: None,
            rejection_reason: None,
            decided_by_escalation: false,
            escalation_actor_id: None,
            escalation_justification: None,
        }
    }

    fn record(steps: Vec<ApprovalStep>) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            request: PromotionRequest {
                id: RequestId("req-1".to_string()),
                subject_id: MemberId("m-ana".to_string()),
                subject: SubjectSnapshot {
                    name: "Ana".to_string(),
                    unit_id: UnitId("unit-1".to_string()),
                    regional_unit_id: UnitId("reg-1".to_string()),
                    current_role: "member".to_string(),
                },
                target_role_id: RoleId("role-trainee".to_string()),
                target_tier: TargetTier::MidInternship,
                schedule: Schedule::new(
                    NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date"),
                    12,
                )
                .expect("valid schedule"),
                requested_by: MemberId("m-req".to_string()),
                requested_by_name: "Requester".to_string(),
                status: RequestStatus::PendingApproval,
                closing_note: None,
                created_at: now,
                decided_at: None,
                updated_at: now,
            },
            steps,
        }
    }

    #[test]
    fn current_step_is_lowest_pending_level() {
        let steps = vec![
            step("s-2", 2, StepStatus::Pending, Some("m-b")),
            step("s-1", 1, StepStatus::Approved, Some("m-a")),
            step("s-3", 3, StepStatus::Pending, Some("m-c")),
        ];

        let current = current_step(&steps).expect("one pending step");
        assert_eq!(current.id.0, "s-2");
    }

    #[test]
    fn current_step_is_none_when_all_decided() {
        let steps = vec![
            step("s-1", 1, StepStatus::Approved, Some("m-a")),
            step("s-2", 2, StepStatus::Rejected, Some("m-b")),
        ];
        assert!(current_step(&steps).is_none());
    }

    #[test]
    fn nominal_approver_cannot_also_escalate() {
        let review = project(
            record(vec![step("s-1", 1, StepStatus::Pending, Some("m-rd"))]),
            &MemberId("m-rd".to_string()),
            true,
        );

        assert!(review.is_nominal_approver);
        assert!(!review.can_escalate);
    }

    #[test]
    fn regional_director_can_escalate_someone_elses_step() {
        let review = project(
            record(vec![step("s-1", 1, StepStatus::Pending, Some("m-ud"))]),
            &MemberId("m-rd".to_string()),
            true,
        );

        assert!(!review.is_nominal_approver);
        assert!(review.can_escalate);
    }

    #[test]
    fn vacant_step_still_offers_escalation_to_a_director() {
        let review = project(
            record(vec![step("s-1", 1, StepStatus::Pending, None)]),
            &MemberId("m-rd".to_string()),
            true,
        );

        assert!(!review.is_nominal_approver);
        assert!(review.can_escalate);
    }

    #[test]
    fn ordinary_viewer_gets_neither_flag() {
        let review = project(
            record(vec![step("s-1", 1, StepStatus::Pending, Some("m-ud"))]),
            &MemberId("m-someone".to_string()),
            false,
        );

        assert!(!review.is_nominal_approver);
        assert!(!review.can_escalate);
    }
}
