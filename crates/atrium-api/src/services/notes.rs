//! Workspace notes and their comment threads.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use atrium_core::{
    defaults, new_entity_id, Comment, ContentSource, EntityQuery, EntityStore, Error, Identity,
    Note, NotificationEvent, Result, SortDirection,
};
use atrium_jobs::Notifier;

use super::workspaces::require_member;

/// Body of a note save. Without an id (or with an unknown id) a new note is
/// created; otherwise the editable fields of the existing note are replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveNoteRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub workspace_id: String,
    pub body: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub kb_entry_id: Option<i64>,
    #[serde(default)]
    pub source: Option<ContentSource>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddCommentRequest {
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Payload of `workspace-note-deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteDeleted {
    pub workspace_id: String,
    pub id: String,
}

/// Payload of `workspace-note-comment-added`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentAdded {
    pub workspace_id: String,
    pub note_id: String,
    pub comment: Comment,
}

#[derive(Clone)]
pub struct NoteService {
    entities: EntityStore,
    notifier: Notifier,
}

impl NoteService {
    pub fn new(entities: EntityStore, notifier: Notifier) -> Self {
        Self { entities, notifier }
    }

    /// Notes of a workspace, newest first.
    pub async fn list(&self, workspace_id: &str, identity: &Identity) -> Result<Vec<Note>> {
        require_member(&self.entities, workspace_id, identity).await?;
        let query = EntityQuery::new()
            .filter("workspace_id", workspace_id)
            .sort_by("created_at", SortDirection::Desc)
            .page(0, defaults::NOTE_LIST_LIMIT);
        self.entities.query(&query).await
    }

    #[instrument(skip(self, identity, request), fields(subsystem = "api", component = "notes", workspace_id = %request.workspace_id))]
    pub async fn save(&self, identity: &Identity, request: SaveNoteRequest) -> Result<Note> {
        require_member(&self.entities, &request.workspace_id, identity).await?;

        let existing = match &request.id {
            Some(id) => self.entities.get::<Note>(id).await?,
            None => None,
        };
        let note = match existing {
            Some(existing) => {
                if existing.workspace_id != request.workspace_id {
                    return Err(Error::InvalidInput(format!(
                        "note {} belongs to another workspace",
                        existing.id
                    )));
                }
                self.entities
                    .update(&existing.id, |note: &mut Note| {
                        note.body = request.body.clone();
                        note.icon = request.icon.clone();
                        note.color = request.color.clone();
                        note.kb_entry_id = request.kb_entry_id;
                        note.source = request.source.clone();
                        note.tags = request.tags.clone();
                        note.importance = request.importance.clone();
                        note.is_private = request.is_private;
                        Ok(true)
                    })
                    .await?
            }
            None => {
                let note = Note {
                    id: request.id.clone().unwrap_or_else(new_entity_id),
                    workspace_id: request.workspace_id.clone(),
                    author: identity.reference(),
                    body: request.body,
                    icon: request.icon,
                    color: request.color,
                    kb_entry_id: request.kb_entry_id,
                    source: request.source,
                    tags: request.tags,
                    importance: request.importance,
                    is_private: request.is_private,
                    created_at: Utc::now(),
                    comments: Vec::new(),
                    revision: 0,
                };
                self.entities.upsert(&note).await?
            }
        };
        info!(note_id = %note.id, "Note saved");

        self.notifier
            .to_group(&note.workspace_id, NotificationEvent::WorkspaceNoteSaved, &note)
            .await;
        Ok(note)
    }

    pub async fn delete(&self, note_id: &str, identity: &Identity) -> Result<()> {
        let note: Note = self.entities.require(note_id).await?;
        require_member(&self.entities, &note.workspace_id, identity).await?;
        self.entities.delete::<Note>(note_id).await?;
        info!(subsystem = "api", component = "notes", note_id, "Note deleted");

        let deleted = NoteDeleted {
            workspace_id: note.workspace_id.clone(),
            id: note.id,
        };
        self.notifier
            .to_group(
                &note.workspace_id,
                NotificationEvent::WorkspaceNoteDeleted,
                &deleted,
            )
            .await;
        Ok(())
    }

    /// Insert a comment at the front of the note's thread.
    pub async fn add_comment(
        &self,
        note_id: &str,
        identity: &Identity,
        request: AddCommentRequest,
    ) -> Result<Note> {
        if request.body.trim().is_empty() {
            return Err(Error::InvalidInput("comment body is required".to_string()));
        }
        let note: Note = self.entities.require(note_id).await?;
        require_member(&self.entities, &note.workspace_id, identity).await?;

        let comment = Comment {
            author: identity.reference(),
            body: request.body,
            parent_id: request.parent_id,
            created_at: Utc::now(),
        };
        let note: Note = self
            .entities
            .update(note_id, |note: &mut Note| {
                note.comments.insert(0, comment.clone());
                Ok(true)
            })
            .await?;

        let added = CommentAdded {
            workspace_id: note.workspace_id.clone(),
            note_id: note.id.clone(),
            comment,
        };
        self.notifier
            .to_group(
                &note.workspace_id,
                NotificationEvent::WorkspaceNoteCommentAdded,
                &added,
            )
            .await;
        Ok(note)
    }
}
