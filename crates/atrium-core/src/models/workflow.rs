//! Durable workflow run records.
//!
//! A run is one execution of an orchestrator workflow against a specific
//! input. The checkpoint records which activities have completed and any
//! state an activity needs to hand to a resumed run (for example the id of a
//! knowledge base operation that was submitted but not yet confirmed).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::{Error, Result};

/// Named workflows run by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Ingest `publishing` sources into the knowledge base and publish.
    Provision,
    /// Remove one source from storage, the knowledge base and the workspace.
    DeleteSource,
    /// Tear down a workspace and everything that depends on it.
    DeleteWorkspace,
    /// Answer a question message from the knowledge base.
    AnswerQuestion,
    /// Link a user and a workspace, then notify the user.
    ConnectMember,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 5] = [
        WorkflowKind::Provision,
        WorkflowKind::DeleteSource,
        WorkflowKind::DeleteWorkspace,
        WorkflowKind::AnswerQuestion,
        WorkflowKind::ConnectMember,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Provision => "provision",
            WorkflowKind::DeleteSource => "delete_source",
            WorkflowKind::DeleteWorkspace => "delete_workspace",
            WorkflowKind::AnswerQuestion => "answer_question",
            WorkflowKind::ConnectMember => "connect_member",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown workflow kind: {}", s)))
    }
}

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown workflow status: {}",
                other
            ))),
        }
    }
}

/// Progress of a run: completed activities plus activity-owned state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub state: Map<String, JsonValue>,
}

impl WorkflowCheckpoint {
    pub fn is_done(&self, activity: &str) -> bool {
        self.completed.iter().any(|a| a == activity)
    }

    pub fn mark_done(&mut self, activity: &str) {
        if !self.is_done(activity) {
            self.completed.push(activity.to_string());
        }
    }

    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.state
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.state.get(key) {
            Some(JsonValue::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.state.remove(key);
    }
}

/// A persisted workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub kind: WorkflowKind,
    /// Caller-chosen key; at most one incomplete run exists per key.
    pub instance_key: String,
    pub status: WorkflowStatus,
    pub input: JsonValue,
    pub checkpoint: WorkflowCheckpoint,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Deserialize the run input into the workflow's typed input.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.input.clone()).map_err(|e| {
            Error::InvalidInput(format!("{} run {} input: {}", self.kind, self.id, e))
        })
    }
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}
