//! Group subscriptions for the server-sent event stream.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use atrium_core::{
    EntityStore, Identity, Notification, NotificationEnvelope, NotificationEvent,
    NotificationPublisher, NotificationTarget, Result,
};

use super::workspaces::require_member;

/// Which workspace groups each user has joined.
///
/// Read on every delivered notification from the event stream, so access is
/// synchronous.
#[derive(Clone, Default)]
pub struct RealtimeGroups {
    joined: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl RealtimeGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, user_id: &str, workspace_id: &str) {
        let mut joined = self.joined.write().unwrap_or_else(|e| e.into_inner());
        joined
            .entry(user_id.to_string())
            .or_default()
            .insert(workspace_id.to_string());
    }

    pub fn leave(&self, user_id: &str, workspace_id: &str) {
        let mut joined = self.joined.write().unwrap_or_else(|e| e.into_inner());
        if let Some(groups) = joined.get_mut(user_id) {
            groups.remove(workspace_id);
            if groups.is_empty() {
                joined.remove(user_id);
            }
        }
    }

    /// Drop the workspace group for every user.
    pub fn forget_workspace(&self, workspace_id: &str) {
        let mut joined = self.joined.write().unwrap_or_else(|e| e.into_inner());
        joined.retain(|_, groups| {
            groups.remove(workspace_id);
            !groups.is_empty()
        });
    }

    /// Number of users with at least one joined group.
    pub fn user_count(&self) -> usize {
        self.joined.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn groups_of(&self, user_id: &str) -> Vec<String> {
        let joined = self.joined.read().unwrap_or_else(|e| e.into_inner());
        joined
            .get(user_id)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `user_id` should receive the notification.
    pub fn delivers_to(&self, user_id: &str, envelope: &NotificationEnvelope) -> bool {
        let joined = self.joined.read().unwrap_or_else(|e| e.into_inner());
        let empty = HashSet::new();
        let groups = joined.get(user_id).unwrap_or(&empty);
        envelope.is_addressed_to(user_id, groups.iter())
    }
}

/// Publisher that prunes [`RealtimeGroups`] on workspace deletion before
/// handing the notification on.
pub struct GroupPruningPublisher {
    groups: RealtimeGroups,
    inner: Arc<dyn NotificationPublisher>,
}

impl GroupPruningPublisher {
    pub fn new(groups: RealtimeGroups, inner: Arc<dyn NotificationPublisher>) -> Self {
        Self { groups, inner }
    }
}

#[async_trait]
impl NotificationPublisher for GroupPruningPublisher {
    async fn publish(&self, notification: Notification) -> Result<()> {
        match (&notification.event, &notification.target) {
            (NotificationEvent::WorkspaceDeleted, NotificationTarget::Group(workspace_id)) => {
                self.groups.forget_workspace(workspace_id);
            }
            (NotificationEvent::WorkspaceDeletedForUser, NotificationTarget::User(user_id)) => {
                if let Some(workspace_id) = notification.payload.as_str() {
                    self.groups.leave(user_id, workspace_id);
                }
            }
            _ => {}
        }
        self.inner.publish(notification).await
    }
}

/// Joins callers to workspace groups after checking membership.
#[derive(Clone)]
pub struct RealtimeService {
    entities: EntityStore,
    groups: RealtimeGroups,
}

impl RealtimeService {
    pub fn new(entities: EntityStore, groups: RealtimeGroups) -> Self {
        Self { entities, groups }
    }

    pub fn groups(&self) -> &RealtimeGroups {
        &self.groups
    }

    pub async fn join(&self, workspace_id: &str, identity: &Identity) -> Result<()> {
        require_member(&self.entities, workspace_id, identity).await?;
        self.groups.join(&identity.id, workspace_id);
        debug!(
            subsystem = "api",
            component = "realtime",
            user_id = %identity.id,
            workspace_id,
            "Joined workspace group"
        );
        Ok(())
    }

    pub fn leave(&self, workspace_id: &str, identity: &Identity) {
        self.groups.leave(&identity.id, workspace_id);
    }
}
