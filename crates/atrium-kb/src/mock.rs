//! Scripted in-memory knowledge base for deterministic testing.
//!
//! Behaves like the hosted service closely enough for orchestrator tests:
//! added files become one entry each (filed under the file name), updates
//! edit entry metadata, deletes drop a source's entries, and queries return
//! entries matching every strict filter. Operation polling follows a script
//! of states, and every call is logged for assertions.
//!
//! ```rust
//! use atrium_core::OperationState;
//! use atrium_kb::mock::ScriptedKnowledgeBase;
//!
//! let kb = ScriptedKnowledgeBase::new()
//!     .with_poll_states(vec![OperationState::Running, OperationState::Succeeded]);
//! assert_eq!(kb.publish_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use atrium_core::{
    Error, KbEntry, KbQuery, KbUpdate, KnowledgeBase, MetadataPair, OperationHandle,
    OperationState, Result, ScoredAnswer,
};

/// One recorded call against the scripted knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub enum KbCall {
    Update {
        kb_id: String,
        update: KbUpdate,
        operation_id: String,
    },
    Status {
        operation_id: String,
    },
    Publish {
        kb_id: String,
    },
    Query {
        kb_id: String,
        query: KbQuery,
    },
    Download {
        kb_id: String,
        source: String,
    },
}

#[derive(Debug)]
struct ScriptState {
    next_operation: u64,
    next_entry: i64,
    /// States reported by successive polls of each new operation; the last
    /// one repeats.
    poll_template: Vec<OperationState>,
    failure_message: String,
    operations: HashMap<String, VecDeque<OperationState>>,
    entries: Vec<KbEntry>,
    answers: Option<Vec<ScoredAnswer>>,
    submit_failures: VecDeque<String>,
    calls: Vec<KbCall>,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            next_operation: 1,
            next_entry: 1,
            poll_template: vec![OperationState::Succeeded],
            failure_message: "operation failed".to_string(),
            operations: HashMap::new(),
            entries: Vec::new(),
            answers: None,
            submit_failures: VecDeque::new(),
            calls: Vec::new(),
        }
    }
}

/// In-memory [`KnowledgeBase`] with scripted operation progress.
#[derive(Clone, Default)]
pub struct ScriptedKnowledgeBase {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// States every new operation reports on successive polls.
    pub fn with_poll_states(self, states: Vec<OperationState>) -> Self {
        if !states.is_empty() {
            self.state.lock().unwrap().poll_template = states;
        }
        self
    }

    /// Error message carried by `Failed` polls.
    pub fn with_failure_message(self, message: impl Into<String>) -> Self {
        self.state.lock().unwrap().failure_message = message.into();
        self
    }

    /// Fixed answers for every query, bypassing entry matching.
    pub fn with_answers(self, answers: Vec<ScoredAnswer>) -> Self {
        self.state.lock().unwrap().answers = Some(answers);
        self
    }

    /// Seed an existing entry.
    pub fn with_entry(self, source: &str, answer: &str, metadata: Vec<MetadataPair>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.next_entry;
            state.next_entry += 1;
            state.entries.push(KbEntry {
                id,
                answer: answer.to_string(),
                source: source.to_string(),
                questions: vec![],
                metadata,
            });
        }
        self
    }

    /// Make the next submitted update fail with a transient error.
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .submit_failures
            .push_back(message.into());
    }

    /// Replace the poll script for operations submitted from now on.
    pub fn set_poll_states(&self, states: Vec<OperationState>) {
        if !states.is_empty() {
            self.state.lock().unwrap().poll_template = states;
        }
    }

    pub fn calls(&self) -> Vec<KbCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn updates(&self) -> Vec<KbUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                KbCall::Update { update, .. } => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, KbCall::Publish { .. }))
            .count()
    }

    pub fn status_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, KbCall::Status { .. }))
            .count()
    }

    /// Current entries filed under `source`.
    pub fn entries_for(&self, source: &str) -> Vec<KbEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

fn apply_update(state: &mut ScriptState, update: &KbUpdate) {
    for file in &update.add {
        let id = state.next_entry;
        state.next_entry += 1;
        state.entries.push(KbEntry {
            id,
            answer: format!("Extracted from {}", file.file_name),
            source: file.file_name.clone(),
            questions: vec![format!("What is in {}?", file.file_name)],
            metadata: vec![],
        });
    }
    for edit in &update.update {
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == edit.id) {
            entry
                .metadata
                .retain(|m| !edit.delete_metadata.contains(m));
            for pair in &edit.add_metadata {
                entry.metadata.retain(|m| m.name != pair.name);
                entry.metadata.push(pair.clone());
            }
        }
    }
    state
        .entries
        .retain(|e| !update.delete.contains(&e.source));
}

#[async_trait]
impl KnowledgeBase for ScriptedKnowledgeBase {
    async fn submit_update(&self, kb_id: &str, update: &KbUpdate) -> Result<OperationHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.submit_failures.pop_front() {
            return Err(Error::External(message));
        }

        let operation_id = format!("op-{}", state.next_operation);
        state.next_operation += 1;
        let script: VecDeque<OperationState> = state.poll_template.iter().copied().collect();
        state.operations.insert(operation_id.clone(), script);
        apply_update(&mut state, update);
        state.calls.push(KbCall::Update {
            kb_id: kb_id.to_string(),
            update: update.clone(),
            operation_id: operation_id.clone(),
        });
        Ok(OperationHandle::running(operation_id))
    }

    async fn operation_status(&self, operation_id: &str) -> Result<OperationHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(KbCall::Status {
            operation_id: operation_id.to_string(),
        });
        let failure_message = state.failure_message.clone();
        let script = state
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| Error::NotFound(format!("operation {}", operation_id)))?;

        let current = if script.len() > 1 {
            script.pop_front().unwrap_or(OperationState::Succeeded)
        } else {
            script.front().copied().unwrap_or(OperationState::Succeeded)
        };
        Ok(OperationHandle {
            operation_id: operation_id.to_string(),
            state: current,
            error: (current == OperationState::Failed).then_some(failure_message),
        })
    }

    async fn publish(&self, kb_id: &str) -> Result<()> {
        self.state.lock().unwrap().calls.push(KbCall::Publish {
            kb_id: kb_id.to_string(),
        });
        Ok(())
    }

    async fn query(&self, kb_id: &str, query: &KbQuery) -> Result<Vec<ScoredAnswer>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(KbCall::Query {
            kb_id: kb_id.to_string(),
            query: query.clone(),
        });
        if let Some(answers) = &state.answers {
            return Ok(answers.clone());
        }

        let direct: Option<i64> = query.direct_id.as_deref().and_then(|id| id.parse().ok());
        Ok(state
            .entries
            .iter()
            .filter(|e| direct.map_or(true, |id| e.id == id))
            .filter(|e| query.filters.iter().all(|f| e.metadata.contains(f)))
            .take(query.top as usize)
            .map(|e| ScoredAnswer {
                id: e.id,
                answer: e.answer.clone(),
                score: 100.0,
                questions: e.questions.clone(),
                source: e.source.clone(),
                metadata: e.metadata.clone(),
                prompts: vec![],
            })
            .collect())
    }

    async fn download_entries(&self, kb_id: &str, source_name: &str) -> Result<Vec<KbEntry>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(KbCall::Download {
            kb_id: kb_id.to_string(),
            source: source_name.to_string(),
        });
        Ok(state
            .entries
            .iter()
            .filter(|e| e.source == source_name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{KbEntryUpdate, KbFile};

    fn file(name: &str) -> KbFile {
        KbFile {
            file_name: name.to_string(),
            file_uri: format!("https://blobs.example/{}", name),
        }
    }

    #[tokio::test]
    async fn test_poll_script_advances_and_repeats_last() {
        let kb = ScriptedKnowledgeBase::new().with_poll_states(vec![
            OperationState::Running,
            OperationState::Succeeded,
        ]);
        let op = kb
            .submit_update("kb", &KbUpdate::add_files(vec![file("a.pdf")]))
            .await
            .unwrap();

        assert_eq!(kb.operation_status(&op.operation_id).await.unwrap().state, OperationState::Running);
        assert_eq!(kb.operation_status(&op.operation_id).await.unwrap().state, OperationState::Succeeded);
        assert_eq!(kb.operation_status(&op.operation_id).await.unwrap().state, OperationState::Succeeded);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_not_found() {
        let kb = ScriptedKnowledgeBase::new();
        assert!(matches!(
            kb.operation_status("op-404").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_added_files_become_taggable_entries() {
        let kb = ScriptedKnowledgeBase::new();
        kb.submit_update("kb", &KbUpdate::add_files(vec![file("a.pdf")]))
            .await
            .unwrap();
        let entries = kb.download_entries("kb", "a.pdf").await.unwrap();
        assert_eq!(entries.len(), 1);

        kb.submit_update(
            "kb",
            &KbUpdate::update_entries(vec![KbEntryUpdate {
                id: entries[0].id,
                add_metadata: vec![MetadataPair::new("workspace", "ws-1")],
                delete_metadata: vec![],
            }]),
        )
        .await
        .unwrap();

        let query = KbQuery {
            question: "anything".to_string(),
            direct_id: None,
            top: 3,
            score_threshold: 10.0,
            filters: vec![MetadataPair::new("workspace", "ws-1")],
        };
        assert_eq!(kb.query("kb", &query).await.unwrap().len(), 1);

        kb.submit_update("kb", &KbUpdate::delete_sources(vec!["a.pdf".to_string()]))
            .await
            .unwrap();
        assert!(kb.query("kb", &query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_submit_is_transient_once() {
        let kb = ScriptedKnowledgeBase::new();
        kb.fail_next_submit("throttled");
        let err = kb.submit_update("kb", &KbUpdate::default()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(kb.submit_update("kb", &KbUpdate::default()).await.is_ok());
    }
}
