pub mod audit;
pub mod chain;
pub mod config;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod notify;
pub mod policy;
pub mod queries;
pub mod store;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use chain::{chain_template, resolve_chain, ResolvedApprover};
pub use directory::{DirectoryError, InMemoryMemberDirectory, MemberDirectory, MemberProfile};
pub use domain::member::{MemberId, RoleId, SubjectSnapshot, UnitId};
pub use domain::request::{
    CompletionOutcome, PromotionRequest, RequestId, RequestStatus, Schedule,
};
pub use domain::step::{ApprovalStep, ApproverRole, StepId, StepStatus, TargetTier};
pub use engine::{NewRequest, PromotionEngine};
pub use errors::WorkflowError;
pub use notify::{
    InMemoryNotificationSink, Notification, NotificationSink, NotifyError,
    TracingNotificationSink, TransitionKind,
};
pub use policy::JustificationPolicy;
pub use queries::{current_step, PendingReview};
pub use store::{
    InMemoryRequestStore, RequestRecord, RequestStore, StoreError, SubjectRoleEffect,
    TransitionWrite,
};
