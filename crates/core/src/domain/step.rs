use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::member::MemberId;
use crate::domain::request::RequestId;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of approver a chain level requires. Closed set; the person
/// holding the role is resolved separately at chain-build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    UnitDirector,
    RegionalDelegate,
    RegionalDirector,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitDirector => "unit_director",
            Self::RegionalDelegate => "regional_delegate",
            Self::RegionalDirector => "regional_director",
        }
    }
}

impl FromStr for ApproverRole {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unit_director" => Ok(Self::UnitDirector),
            "regional_delegate" => Ok(Self::RegionalDelegate),
            "regional_director" => Ok(Self::RegionalDirector),
            other => Err(WorkflowError::InvalidApproverRole(other.to_string())),
        }
    }
}

/// Target rank bracket. Each tier implies a fixed approver topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTier {
    SeniorInternship,
    MidInternship,
    Training,
}

impl TargetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeniorInternship => "senior_internship",
            Self::MidInternship => "mid_internship",
            Self::Training => "training",
        }
    }
}

impl FromStr for TargetTier {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "senior_internship" => Ok(Self::SeniorInternship),
            "mid_internship" => Ok(Self::MidInternship),
            "training" => Ok(Self::Training),
            other => Err(WorkflowError::InvalidTier(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub request_id: RequestId,
    /// 1-based position in the chain; levels are contiguous.
    pub level: u8,
    pub approver_role: ApproverRole,
    /// Resolved person at chain-build time. `None` when the role was vacant;
    /// the step still exists so the chain stays complete and auditable.
    pub approver_actor_id: Option<MemberId>,
    pub status: StepStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub decided_by_escalation: bool,
    pub escalation_actor_id: Option<MemberId>,
    pub escalation_justification: Option<String>,
}

impl ApprovalStep {
    pub fn is_decided(&self) -> bool {
        self.status != StepStatus::Pending
    }
}
