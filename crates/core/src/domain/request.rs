use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::member::{MemberId, RoleId, SubjectSnapshot};
use crate::domain::step::TargetTier;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed outcome of a finished probation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    CompletedWithCredit,
    CompletedWithoutCredit,
    ClosedForNewProbation,
}

impl CompletionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompletedWithCredit => "completed_with_credit",
            Self::CompletedWithoutCredit => "completed_without_credit",
            Self::ClosedForNewProbation => "closed_for_new_probation",
        }
    }

    /// Every outcome except a clean credited completion must be accompanied
    /// by an observation meeting the justification policy.
    pub fn requires_observation(&self) -> bool {
        !matches!(self, Self::CompletedWithCredit)
    }
}

impl FromStr for CompletionOutcome {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed_with_credit" => Ok(Self::CompletedWithCredit),
            "completed_without_credit" => Ok(Self::CompletedWithoutCredit),
            "closed_for_new_probation" => Ok(Self::ClosedForNewProbation),
            other => Err(WorkflowError::InvalidOutcome(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    PendingApproval,
    Active,
    Rejected,
    Cancelled,
    Completed(CompletionOutcome),
}

impl RequestStatus {
    /// Open requests block a new submission for the same subject.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::PendingApproval | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed(_))
    }
}

/// Probation schedule; the expected end is derived from start + duration and
/// frozen on the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: NaiveDate,
    pub duration_months: u32,
    pub expected_end_date: NaiveDate,
}

impl Schedule {
    pub fn new(start_date: NaiveDate, duration_months: u32) -> Result<Self, WorkflowError> {
        if duration_months == 0 || duration_months > 36 {
            return Err(WorkflowError::InvalidSchedule(format!(
                "duration must be between 1 and 36 months, got {duration_months}"
            )));
        }

        let expected_end_date = start_date
            .checked_add_months(Months::new(duration_months))
            .ok_or_else(|| WorkflowError::InvalidSchedule("start date out of range".to_string()))?;

        Ok(Self { start_date, duration_months, expected_end_date })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub id: RequestId,
    pub subject_id: MemberId,
    pub subject: SubjectSnapshot,
    pub target_role_id: RoleId,
    pub target_tier: TargetTier,
    pub schedule: Schedule,
    pub requested_by: MemberId,
    pub requested_by_name: String,
    pub status: RequestStatus,
    /// Justification recorded at cancellation, or the closing observation
    /// recorded at completion. Rejection reasons live on the step instead.
    pub closing_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PromotionRequest {
    pub fn can_transition_to(&self, next: &RequestStatus) -> bool {
        matches!(
            (&self.status, next),
            (RequestStatus::PendingApproval, RequestStatus::Active)
                | (RequestStatus::PendingApproval, RequestStatus::Rejected)
                | (RequestStatus::PendingApproval, RequestStatus::Cancelled)
                | (RequestStatus::Active, RequestStatus::Completed(_))
        )
    }
}
