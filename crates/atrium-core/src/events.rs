//! Real-time notifications and the notification hub.
//!
//! Orchestrator activities, the invitation flow and the request services
//! publish named events at either one user or a workspace group. The
//! [`NotificationHub`] fans every notification out over a broadcast channel;
//! transports (the SSE stream in the API) subscribe and filter by target.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! event: workspace-documents-added
//! id: 019508a0-1234-7def-8000-abcdef123456
//! data: {"notification_id":"...","event":"workspace-documents-added","target":{"group":"ws-1"},...}
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::traits::NotificationPublisher;
use crate::Result;

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTarget {
    /// One user, by id.
    User(String),
    /// Everyone joined to a workspace group, by workspace id.
    Group(String),
}

impl NotificationTarget {
    pub fn user(id: impl Into<String>) -> Self {
        NotificationTarget::User(id.into())
    }

    pub fn group(workspace_id: impl Into<String>) -> Self {
        NotificationTarget::Group(workspace_id.into())
    }
}

/// Named notification events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationEvent {
    /// First publish of a workspace; sent to the creator.
    WorkspaceDocumentsProvisioned,
    /// Later publish after adding files; sent to the workspace group.
    WorkspaceDocumentsAdded,
    WorkspaceSourceDeleted,
    /// Sent to each member when a workspace they belong to is deleted.
    WorkspaceDeletedForUser,
    WorkspaceDeleted,
    QnaQuestionAnswered,
    WorkspaceQuestionReceived,
    WorkspaceChatReceived,
    WorkspaceNoteSaved,
    WorkspaceNoteDeleted,
    WorkspaceNoteCommentAdded,
    UserInvitedToWorkspace,
    UserAcceptInvitation,
    UserMutateAddWorkspace,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::WorkspaceDocumentsProvisioned => "workspace-documents-provisioned",
            NotificationEvent::WorkspaceDocumentsAdded => "workspace-documents-added",
            NotificationEvent::WorkspaceSourceDeleted => "workspace-source-deleted",
            NotificationEvent::WorkspaceDeletedForUser => "workspace-deleted-for-user",
            NotificationEvent::WorkspaceDeleted => "workspace-deleted",
            NotificationEvent::QnaQuestionAnswered => "qna-question-answered",
            NotificationEvent::WorkspaceQuestionReceived => "workspace-question-received",
            NotificationEvent::WorkspaceChatReceived => "workspace-chat-received",
            NotificationEvent::WorkspaceNoteSaved => "workspace-note-saved",
            NotificationEvent::WorkspaceNoteDeleted => "workspace-note-deleted",
            NotificationEvent::WorkspaceNoteCommentAdded => "workspace-note-comment-added",
            NotificationEvent::UserInvitedToWorkspace => "user-invited-to-workspace",
            NotificationEvent::UserAcceptInvitation => "user-accept-invitation",
            NotificationEvent::UserMutateAddWorkspace => "user-mutate-add-workspace",
        }
    }
}

impl std::fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification before it is stamped for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub target: NotificationTarget,
    pub event: NotificationEvent,
    pub payload: JsonValue,
}

impl Notification {
    /// Build a notification from any serializable payload.
    pub fn new<P: Serialize>(
        target: NotificationTarget,
        event: NotificationEvent,
        payload: &P,
    ) -> Result<Self> {
        Ok(Self {
            target,
            event,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// A delivered notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// UUIDv7, so clients can order and de-duplicate re-deliveries.
    pub notification_id: Uuid,
    pub event: NotificationEvent,
    pub target: NotificationTarget,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl NotificationEnvelope {
    pub fn new(notification: Notification) -> Self {
        Self {
            notification_id: crate::uuid_utils::new_v7(),
            event: notification.event,
            target: notification.target,
            occurred_at: Utc::now(),
            payload: notification.payload,
        }
    }

    /// Whether a subscriber with this user id and group set should see it.
    pub fn is_addressed_to<'a>(
        &self,
        user_id: &str,
        mut groups: impl Iterator<Item = &'a String>,
    ) -> bool {
        match &self.target {
            NotificationTarget::User(id) => id == user_id,
            NotificationTarget::Group(group) => groups.any(|g| g == group),
        }
    }
}

/// Broadcast fan-out of notifications to in-process subscribers.
///
/// When nobody is subscribed the notification is dropped, which is
/// acceptable for at-least-once best-effort delivery.
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<NotificationEnvelope>,
}

impl NotificationHub {
    /// Create a hub with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, notification: Notification) -> NotificationEnvelope {
        let envelope = NotificationEnvelope::new(notification);
        tracing::debug!(
            event_name = envelope.event.as_str(),
            notification_id = %envelope.notification_id,
            target = ?envelope.target,
            subscriber_count = self.tx.receiver_count(),
            "Notification emit"
        );
        let _ = self.tx.send(envelope.clone());
        envelope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(crate::defaults::NOTIFICATION_HUB_CAPACITY)
    }
}

#[async_trait]
impl NotificationPublisher for NotificationHub {
    async fn publish(&self, notification: Notification) -> Result<()> {
        self.emit(notification);
        Ok(())
    }
}
