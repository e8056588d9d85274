use thiserror::Error;

use crate::domain::member::MemberId;
use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::step::StepId;

/// Every way an engine operation can be refused. All failures are reported
/// synchronously to the caller; none end the process.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("unknown target tier `{0}`")]
    InvalidTier(String),
    #[error("unknown approver role `{0}`")]
    InvalidApproverRole(String),
    #[error("unknown completion outcome `{0}`")]
    InvalidOutcome(String),
    #[error("subject `{0}` already has an open promotion request")]
    DuplicateActiveRequest(MemberId),
    #[error("approval step `{0}` is not the chain's current step")]
    NotCurrentStep(StepId),
    #[error("approval step `{0}` has already been decided")]
    StepAlreadyDecided(StepId),
    #[error("actor `{0}` is neither the nominal approver nor an eligible escalator")]
    NotEligibleApprover(MemberId),
    #[error("justification is {length} characters, policy minimum is {minimum}")]
    JustificationTooShort { length: usize, minimum: usize },
    #[error("request `{request_id}` does not allow this operation in status {status:?}")]
    InvalidState { request_id: RequestId, status: RequestStatus },
    #[error("approval step `{0}` has no resolved approver; a regional director may escalate")]
    VacantApprover(StepId),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("unknown promotion request `{0}`")]
    UnknownRequest(RequestId),
    #[error("unknown approval step `{0}`")]
    UnknownStep(StepId),
    #[error("unknown member `{0}`")]
    UnknownMember(MemberId),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("directory lookup failure: {0}")]
    Directory(String),
}
