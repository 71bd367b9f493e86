//! Knowledge base request and response types.
//!
//! These mirror the operations the orchestrator needs from the external
//! question-answering index: batched updates returning a long-running
//! operation handle, publish, scoped queries and per-source entry downloads.

use serde::{Deserialize, Serialize};

/// A `(name, value)` tag attached to knowledge base entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPair {
    pub name: String,
    pub value: String,
}

impl MetadataPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A document the knowledge base should ingest from a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbFile {
    pub file_name: String,
    pub file_uri: String,
}

/// Metadata edit for one existing knowledge base entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntryUpdate {
    pub id: i64,
    #[serde(default)]
    pub add_metadata: Vec<MetadataPair>,
    #[serde(default)]
    pub delete_metadata: Vec<MetadataPair>,
}

/// One batched update. Empty sections are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbUpdate {
    #[serde(default)]
    pub add: Vec<KbFile>,
    #[serde(default)]
    pub update: Vec<KbEntryUpdate>,
    /// Source names whose entries should be removed.
    #[serde(default)]
    pub delete: Vec<String>,
}

impl KbUpdate {
    pub fn add_files(files: Vec<KbFile>) -> Self {
        Self {
            add: files,
            ..Default::default()
        }
    }

    pub fn update_entries(entries: Vec<KbEntryUpdate>) -> Self {
        Self {
            update: entries,
            ..Default::default()
        }
    }

    pub fn delete_sources(sources: Vec<String>) -> Self {
        Self {
            delete: sources,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// State of a long-running knowledge base operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Running,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Running)
    }
}

/// Opaque handle for an in-progress knowledge base mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub operation_id: String,
    pub state: OperationState,
    #[serde(default)]
    pub error: Option<String>,
}

impl OperationHandle {
    pub fn running(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            state: OperationState::Running,
            error: None,
        }
    }
}

/// A scoped question against the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbQuery {
    /// Natural-language question; ignored when `direct_id` is set.
    pub question: String,
    /// Entry id to return directly (follow-up prompts).
    #[serde(default)]
    pub direct_id: Option<String>,
    pub top: u32,
    pub score_threshold: f64,
    /// Every filter must match (strict filtering).
    #[serde(default)]
    pub filters: Vec<MetadataPair>,
}

/// A follow-up prompt attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPrompt {
    pub display_order: i32,
    pub qna_id: i64,
    pub display_text: String,
}

/// One ranked answer returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredAnswer {
    pub id: i64,
    pub answer: String,
    pub score: f64,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: Vec<MetadataPair>,
    #[serde(default)]
    pub prompts: Vec<AnswerPrompt>,
}

/// One stored knowledge base entry, as downloaded per source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: i64,
    pub answer: String,
    pub source: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataPair>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_state_terminal() {
        assert!(!OperationState::Running.is_terminal());
        assert!(OperationState::Succeeded.is_terminal());
        assert!(OperationState::Failed.is_terminal());
    }

    #[test]
    fn test_update_constructors() {
        assert!(KbUpdate::default().is_empty());
        let update = KbUpdate::delete_sources(vec!["a.pdf".into()]);
        assert!(!update.is_empty());
        assert!(update.add.is_empty());
    }
}
