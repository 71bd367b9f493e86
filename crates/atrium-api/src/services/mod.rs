//! Request-side services shared by the HTTP handlers.

pub mod messaging;
pub mod notes;
pub mod realtime;
pub mod workspaces;

pub use messaging::{MessagingService, PostMessageRequest};
pub use notes::{AddCommentRequest, CommentAdded, NoteDeleted, NoteService, SaveNoteRequest};
pub use realtime::{GroupPruningPublisher, RealtimeGroups, RealtimeService};
pub use workspaces::{require_member, Queued, UploadedFile, WorkspaceService};
