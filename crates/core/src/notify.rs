use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::domain::member::{MemberId, RoleId};
use crate::domain::request::RequestId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Submitted,
    Approved,
    Rejected,
    Escalated,
    Cancelled,
    Completed,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

/// Enough data for a downstream channel to render a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub request_id: RequestId,
    pub kind: TransitionKind,
    pub subject_name: String,
    pub target_role_id: RoleId,
    pub actor_id: MemberId,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Error)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// Fire-and-forget dispatch invoked after each committed transition. A
/// failing sink never rolls the transition back; the engine logs the failure
/// and moves on.
pub trait NotificationSink: Send + Sync {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationSink {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }
}

/// Renders notifications into the structured log instead of a real channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            event_name = "notification.dispatched",
            request_id = %notification.request_id,
            kind = notification.kind.as_str(),
            subject = notification.subject_name.as_str(),
            target_role = %notification.target_role_id,
            actor = %notification.actor_id,
            "promotion request {}",
            notification.kind.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryNotificationSink, Notification, NotificationSink, TransitionKind};
    use crate::domain::member::{MemberId, RoleId};
    use crate::domain::request::RequestId;

    #[test]
    fn in_memory_sink_records_dispatched_notifications() {
        let sink = InMemoryNotificationSink::default();
        sink.dispatch(&Notification {
            request_id: RequestId("req-1".to_string()),
            kind: TransitionKind::Approved,
            subject_name: "Sofia Marchetti".to_string(),
            target_role_id: RoleId("role-trainee".to_string()),
            actor_id: MemberId("m-ud".to_string()),
            detail: None,
        })
        .expect("dispatch");

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TransitionKind::Approved);
    }
}
