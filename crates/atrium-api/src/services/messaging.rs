//! Chat and question messages. Messages are broadcast, never stored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use atrium_core::{
    new_entity_id, EntityStore, Error, Identity, Message, MessageType, NotificationEvent, Result,
};
use atrium_jobs::{Notifier, WorkspaceOrchestrator};

use super::workspaces::require_member;

/// Body of a chat or question post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMessageRequest {
    /// Client-side id, echoed back so the client can replace its placeholder.
    #[serde(default)]
    pub id: Option<String>,
    pub workspace_id: String,
    pub body: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Knowledge base entry to answer from directly.
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
}

#[derive(Clone)]
pub struct MessagingService {
    entities: EntityStore,
    notifier: Notifier,
    orchestrator: WorkspaceOrchestrator,
}

impl MessagingService {
    pub fn new(
        entities: EntityStore,
        notifier: Notifier,
        orchestrator: WorkspaceOrchestrator,
    ) -> Self {
        Self {
            entities,
            notifier,
            orchestrator,
        }
    }

    async fn build(
        &self,
        identity: &Identity,
        request: PostMessageRequest,
        default_type: MessageType,
    ) -> Result<Message> {
        if request.body.trim().is_empty() && request.target_id.is_none() {
            return Err(Error::InvalidInput("message body is required".to_string()));
        }
        require_member(&self.entities, &request.workspace_id, identity).await?;
        Ok(Message {
            id: request.id.unwrap_or_else(new_entity_id),
            workspace_id: request.workspace_id,
            created_at: Utc::now(),
            parent_message_id: None,
            title: request.title,
            body: request.body,
            target_id: request.target_id,
            author: identity.reference(),
            posted: true,
            message_type: request.message_type.unwrap_or(default_type),
        })
    }

    /// Broadcast a chat message to the workspace group.
    #[instrument(skip(self, identity, request), fields(subsystem = "api", component = "messaging", workspace_id = %request.workspace_id))]
    pub async fn chat(&self, identity: &Identity, request: PostMessageRequest) -> Result<Message> {
        let message = self.build(identity, request, MessageType::UserChat).await?;
        self.notifier
            .to_group(
                &message.workspace_id,
                NotificationEvent::WorkspaceChatReceived,
                &message,
            )
            .await;
        Ok(message)
    }

    /// Acknowledge a question to the group, then queue its answer.
    #[instrument(skip(self, identity, request), fields(subsystem = "api", component = "messaging", workspace_id = %request.workspace_id))]
    pub async fn ask(
        &self,
        identity: &Identity,
        request: PostMessageRequest,
    ) -> Result<(Message, Uuid)> {
        let default_type = if request.target_id.is_some() {
            MessageType::UserQuestionDirect
        } else {
            MessageType::UserQuestion
        };
        let message = self.build(identity, request, default_type).await?;
        self.notifier
            .to_group(
                &message.workspace_id,
                NotificationEvent::WorkspaceQuestionReceived,
                &message,
            )
            .await;
        let run_id = self.orchestrator.start_answer_question(&message).await?;
        Ok((message, run_id))
    }
}
