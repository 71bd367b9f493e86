//! Core data models for atrium.
//!
//! These types are shared across all atrium crates and represent the
//! persisted domain entities (workspaces, users, invitations, notes) plus the
//! ephemeral chat message. Every persisted entity carries a `revision` that
//! the entity store uses for compare-and-swap writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};

pub mod knowledge;
pub mod workflow;

pub use knowledge::*;
pub use workflow::*;

// =============================================================================
// REFERENCES
// =============================================================================

/// Lightweight reference to another entity, embedded by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericRef {
    pub id: String,
    pub name: String,
}

impl GenericRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A (parent, embedded) pair of references describing a relationship edge,
/// e.g. a user (parent) that should list a workspace (embedded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub parent: GenericRef,
    pub embedded: GenericRef,
}

impl EntityRelation {
    pub fn new(parent: GenericRef, embedded: GenericRef) -> Self {
        Self { parent, embedded }
    }
}

/// Canonical form of an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Authenticated caller, as extracted by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Identity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn reference(&self) -> GenericRef {
        GenericRef::new(self.id.clone(), self.display_name())
    }

    /// Case-insensitive email comparison.
    pub fn email_matches(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

// =============================================================================
// WORKSPACE
// =============================================================================

/// Lifecycle status of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Provisioning,
    Published,
    Deleting,
}

/// Lifecycle status of a content source inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Publishing,
    Published,
    Deleting,
}

/// One uploaded document within a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSource {
    pub display_name: String,
    pub original_file_name: String,
    /// Blob path inside the object store; unique per source.
    pub storage_path: String,
    pub added_by_id: String,
    pub added_at: DateTime<Utc>,
    pub status: SourceStatus,
}

impl ContentSource {
    /// Name the knowledge base files this source under: the final segment of
    /// its blob path.
    pub fn kb_source_name(&self) -> &str {
        kb_source_name(&self.storage_path)
    }
}

/// Final segment of a blob path, used as the knowledge base source name.
pub fn kb_source_name(storage_path: &str) -> &str {
    storage_path.rsplit('/').next().unwrap_or(storage_path)
}

/// Membership record embedded in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user: GenericRef,
    pub joined_at: DateTime<Utc>,
}

/// Aggregate root: a named set of documents and members backed by the
/// knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: GenericRef,
    pub created_at: DateTime<Utc>,
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub sources: Vec<ContentSource>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub revision: i64,
}

impl Workspace {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: GenericRef,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            created_by,
            created_at: Utc::now(),
            status: WorkspaceStatus::Provisioning,
            sources: Vec::new(),
            members: Vec::new(),
            revision: 0,
        }
    }

    pub fn reference(&self) -> GenericRef {
        GenericRef::new(self.id.clone(), self.name.clone())
    }

    pub fn source_by_path(&self, storage_path: &str) -> Option<&ContentSource> {
        self.sources.iter().find(|s| s.storage_path == storage_path)
    }

    /// Storage paths of every source currently in `status`.
    pub fn source_paths_with_status(&self, status: SourceStatus) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.storage_path.clone())
            .collect()
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user.id == user_id)
    }

    /// Adds the user as a member unless already present. Returns whether the
    /// member list changed.
    pub fn add_member(&mut self, user: GenericRef) -> bool {
        if self.has_member(&user.id) {
            return false;
        }
        self.members.push(Member {
            user,
            joined_at: Utc::now(),
        });
        true
    }

    /// Removes the user from the member list. Returns whether it changed.
    pub fn remove_member(&mut self, user_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.user.id != user_id);
        before != self.members.len()
    }

    pub fn is_creator(&self, user_id: &str) -> bool {
        self.created_by.id == user_id
    }
}

impl Entity for Workspace {
    const KIND: EntityKind = EntityKind::Workspace;

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.created_by.id
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }
}

// =============================================================================
// USER
// =============================================================================

/// A signed-in person and the workspaces they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub workspaces: Vec<GenericRef>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: i64,
}

impl User {
    /// New user record for a signed-in identity. Emails are stored
    /// lowercased so equality queries match invitations.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            email: normalize_email(&identity.email),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            workspaces: Vec::new(),
            created_at: Utc::now(),
            revision: 0,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn reference(&self) -> GenericRef {
        GenericRef::new(self.id.clone(), self.display_name())
    }

    pub fn has_workspace(&self, workspace_id: &str) -> bool {
        self.workspaces.iter().any(|w| w.id == workspace_id)
    }

    /// Adds the workspace reference unless already present. Returns whether
    /// the list changed.
    pub fn add_workspace(&mut self, workspace: GenericRef) -> bool {
        if self.has_workspace(&workspace.id) {
            return false;
        }
        self.workspaces.push(workspace);
        true
    }

    pub fn remove_workspace(&mut self, workspace_id: &str) -> bool {
        let before = self.workspaces.len();
        self.workspaces.retain(|w| w.id != workspace_id);
        before != self.workspaces.len()
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.id
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }
}

// =============================================================================
// INVITATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
        }
    }
}

impl std::str::FromStr for InvitationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown invitation status: {}",
                other
            ))),
        }
    }
}

/// A request, addressed by email, to join a workspace. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub workspace_id: String,
    /// Workspace name at the time of the invitation.
    pub display_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub message: String,
    pub invited_by: GenericRef,
    pub created_at: DateTime<Utc>,
    pub status: InvitationStatus,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision: i64,
}

impl Entity for Invitation {
    const KIND: EntityKind = EntityKind::Invitation;

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.workspace_id
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }
}

// =============================================================================
// NOTE
// =============================================================================

/// Comment on a note. Newest comments come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: GenericRef,
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A workspace note with threaded comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub workspace_id: String,
    pub author: GenericRef,
    pub body: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Knowledge base entry the note was saved from, if any.
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
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub revision: i64,
}

impl Entity for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.workspace_id
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.revision = revision;
    }
}

// =============================================================================
// MESSAGE (ephemeral)
// =============================================================================

/// Intent of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserChat,
    UserQuestion,
    /// Follow-up prompt addressing a knowledge base entry directly.
    UserQuestionDirect,
    BotPlaceholder,
    BotResponse,
    SavedNote,
    UserCreatedNote,
    NoteComment,
    MeetingRequest,
    EndMeeting,
}

/// Chat or question record. Constructed per request and broadcast, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
    /// Direct knowledge base entry id to answer from.
    #[serde(default)]
    pub target_id: Option<String>,
    pub author: GenericRef,
    #[serde(default)]
    pub posted: bool,
    pub message_type: MessageType,
}
