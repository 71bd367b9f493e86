//! Workspace lifecycle orchestrator.
//!
//! Every workflow is a durable [`WorkflowRun`](atrium_core::WorkflowRun)
//! executed by the worker through a [`WorkflowHandler`]. Activities run in a
//! fixed order, skip themselves when the checkpoint says they already
//! finished, and re-read entity records instead of trusting the run input.
//! Knowledge base mutations are split into a submit activity (which records
//! the operation id) and an await activity (which polls it), so a resumed run
//! never submits the same update twice.

mod delete_source;
mod delete_workspace;
mod provision;
mod question;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use atrium_core::{
    defaults, ContentSource, EntityRelation, EntityStore, Error, KbUpdate, KnowledgeBase, Message,
    NotificationEvent, NotificationPublisher, ObjectStore, Result, SourceStatus, WorkflowKind,
    WorkflowRepository, WorkflowRun, Workspace, WorkspaceStatus,
};

use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};
use crate::mutator::MembershipMutator;
use crate::notifier::Notifier;
use crate::poll::{OperationPoller, PollPolicy};

pub use delete_source::{DeleteSourceInput, DeleteSourceWorkflow};
pub use delete_workspace::{DeleteWorkspaceInput, DeleteWorkspaceWorkflow};
pub use provision::{ProvisionInput, ProvisionWorkflow};
pub use question::AnswerQuestionWorkflow;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Knowledge base every workspace shares.
    pub kb_id: String,
    pub poll: PollPolicy,
    /// Lifetime of the signed URLs the knowledge base downloads from.
    pub provision_url_ttl: Duration,
    pub answer_top: u32,
    pub answer_score_threshold: f64,
    /// Author name of synthetic answer messages.
    pub bot_display_name: String,
    pub note_delete_page: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kb_id: String::new(),
            poll: PollPolicy::default(),
            provision_url_ttl: Duration::from_secs(defaults::PROVISION_URL_TTL_SECS),
            answer_top: defaults::ANSWER_TOP,
            answer_score_threshold: defaults::ANSWER_SCORE_THRESHOLD,
            bot_display_name: defaults::BOT_DISPLAY_NAME.to_string(),
            note_delete_page: defaults::NOTE_DELETE_PAGE,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(kb_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            ..Default::default()
        }
    }

    /// | Variable | Default |
    /// |----------|---------|
    /// | `KB_ID` | (required) |
    /// | `KB_POLL_INTERVAL_MS` | `3000` |
    /// | `KB_POLL_MAX_ATTEMPTS` | `20` |
    /// | `PROVISION_URL_TTL_SECS` | `600` |
    /// | `ANSWER_TOP` | `3` |
    /// | `ANSWER_SCORE_THRESHOLD` | `10` |
    /// | `BOT_DISPLAY_NAME` | `Atrium` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            kb_id: std::env::var("KB_ID").unwrap_or_default(),
            poll: PollPolicy::from_env(),
            provision_url_ttl: std::env::var("PROVISION_URL_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.provision_url_ttl),
            answer_top: std::env::var("ANSWER_TOP")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.answer_top),
            answer_score_threshold: std::env::var("ANSWER_SCORE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(defaults.answer_score_threshold),
            bot_display_name: std::env::var("BOT_DISPLAY_NAME")
                .unwrap_or(defaults.bot_display_name),
            note_delete_page: defaults.note_delete_page,
        }
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_note_delete_page(mut self, page: i64) -> Self {
        self.note_delete_page = page.max(1);
        self
    }

    pub fn with_bot_display_name(mut self, name: impl Into<String>) -> Self {
        self.bot_display_name = name.into();
        self
    }
}

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub entities: EntityStore,
    pub objects: Arc<dyn ObjectStore>,
    pub kb: Arc<dyn KnowledgeBase>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub workflows: Arc<dyn WorkflowRepository>,
}

pub(crate) struct Shared {
    pub(crate) entities: EntityStore,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) kb: Arc<dyn KnowledgeBase>,
    pub(crate) notifier: Notifier,
    pub(crate) poller: OperationPoller,
    pub(crate) mutator: MembershipMutator,
    pub(crate) workflows: Arc<dyn WorkflowRepository>,
    pub(crate) config: OrchestratorConfig,
}

impl Shared {
    /// Submit a knowledge base update and remember its operation id. Empty
    /// updates submit nothing and record no operation.
    pub(crate) async fn submit_update(
        &self,
        ctx: &mut WorkflowContext,
        activity: &str,
        update: KbUpdate,
    ) -> Result<()> {
        let operation_id = if update.is_empty() {
            None
        } else {
            let handle = self.kb.submit_update(&self.config.kb_id, &update).await?;
            info!(
                subsystem = "jobs",
                component = "orchestrator",
                workflow_id = %ctx.run_id(),
                activity,
                operation_id = %handle.operation_id,
                "Knowledge base update submitted"
            );
            Some(handle.operation_id)
        };
        ctx.set_state(&operation_key(activity), &operation_id)?;
        ctx.complete_activity(activity).await
    }

    /// Poll the operation recorded by `submitted` to a terminal state.
    pub(crate) async fn await_update(
        &self,
        ctx: &mut WorkflowContext,
        submitted: &str,
        activity: &str,
    ) -> Result<()> {
        let operation_id: Option<String> = ctx.state(&operation_key(submitted))?;
        if let Some(operation_id) = operation_id {
            self.poller.wait(&operation_id).await?;
        }
        ctx.complete_activity(activity).await
    }
}

fn operation_key(activity: &str) -> String {
    format!("{}.operation_id", activity)
}

/// Starts workflows and owns their handlers.
#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    shared: Arc<Shared>,
}

impl WorkspaceOrchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        let poller = OperationPoller::new(deps.kb.clone(), config.poll);
        let shared = Shared {
            mutator: MembershipMutator::new(deps.entities.clone()),
            notifier: Notifier::new(deps.publisher),
            entities: deps.entities,
            objects: deps.objects,
            kb: deps.kb,
            poller,
            workflows: deps.workflows,
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn mutator(&self) -> &MembershipMutator {
        &self.shared.mutator
    }

    pub fn notifier(&self) -> &Notifier {
        &self.shared.notifier
    }

    /// One handler per workflow kind, for registration with the worker.
    pub fn handlers(&self) -> Vec<Arc<dyn WorkflowHandler>> {
        vec![
            Arc::new(ProvisionWorkflow::new(self.shared.clone())),
            Arc::new(DeleteSourceWorkflow::new(self.shared.clone())),
            Arc::new(DeleteWorkspaceWorkflow::new(self.shared.clone())),
            Arc::new(AnswerQuestionWorkflow::new(self.shared.clone())),
            Arc::new(ConnectMemberWorkflow {
                shared: self.shared.clone(),
            }),
        ]
    }

    /// Queue provisioning of every `Publishing` source of the workspace.
    #[instrument(skip(self, workspace), fields(subsystem = "jobs", component = "orchestrator", workspace_id = %workspace.id))]
    pub async fn start_provision(&self, workspace: &Workspace) -> Result<Uuid> {
        let paths = workspace.source_paths_with_status(SourceStatus::Publishing);
        self.enqueue_provision(&workspace.id, paths).await
    }

    async fn enqueue_provision(&self, workspace_id: &str, source_paths: Vec<String>) -> Result<Uuid> {
        let key = format!(
            "provision:{}:{}",
            workspace_id,
            source_paths.first().map(String::as_str).unwrap_or("none")
        );
        let input = ProvisionInput {
            workspace_id: workspace_id.to_string(),
            source_paths,
        };
        self.enqueue(WorkflowKind::Provision, &key, serde_json::to_value(&input)?)
            .await
    }

    /// Append sources as `Publishing` and queue provisioning scoped to them.
    ///
    /// The blobs must already be stored. Sources whose path is already listed
    /// are not added twice.
    #[instrument(skip(self, sources), fields(subsystem = "jobs", component = "orchestrator", count = sources.len()))]
    pub async fn start_add_source(
        &self,
        workspace_id: &str,
        sources: Vec<ContentSource>,
    ) -> Result<(Workspace, Uuid)> {
        if sources.is_empty() {
            return Err(Error::InvalidInput("no files to add".to_string()));
        }
        let paths: Vec<String> = sources.iter().map(|s| s.storage_path.clone()).collect();
        let workspace: Workspace = self
            .shared
            .entities
            .update(workspace_id, |ws: &mut Workspace| {
                if ws.status == WorkspaceStatus::Deleting {
                    return Err(Error::InvalidInput(format!(
                        "workspace {} is being deleted",
                        ws.id
                    )));
                }
                let mut changed = false;
                for source in &sources {
                    if ws.source_by_path(&source.storage_path).is_none() {
                        let mut source = source.clone();
                        source.status = SourceStatus::Publishing;
                        ws.sources.push(source);
                        changed = true;
                    }
                }
                Ok(changed)
            })
            .await?;
        let run_id = self.enqueue_provision(workspace_id, paths).await?;
        Ok((workspace, run_id))
    }

    /// Mark the source at `index` as `Deleting` and queue its removal.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator"))]
    pub async fn start_delete_source(
        &self,
        workspace_id: &str,
        index: usize,
    ) -> Result<(Workspace, Uuid)> {
        let mut storage_path = String::new();
        let workspace: Workspace = self
            .shared
            .entities
            .update(workspace_id, |ws: &mut Workspace| {
                let count = ws.sources.len();
                let source = ws.sources.get_mut(index).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "source index {} out of range ({} sources)",
                        index, count
                    ))
                })?;
                storage_path = source.storage_path.clone();
                if source.status == SourceStatus::Deleting {
                    return Ok(false);
                }
                source.status = SourceStatus::Deleting;
                Ok(true)
            })
            .await?;

        let key = format!("delete_source:{}:{}", workspace_id, storage_path);
        let input = DeleteSourceInput {
            workspace_id: workspace_id.to_string(),
            storage_path,
        };
        let run_id = self
            .enqueue(WorkflowKind::DeleteSource, &key, serde_json::to_value(&input)?)
            .await?;
        Ok((workspace, run_id))
    }

    /// Mark the workspace `Deleting` and queue its teardown.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "orchestrator"))]
    pub async fn start_delete_workspace(&self, workspace_id: &str) -> Result<Uuid> {
        self.shared
            .entities
            .update(workspace_id, |ws: &mut Workspace| {
                if ws.status == WorkspaceStatus::Deleting {
                    return Ok(false);
                }
                ws.status = WorkspaceStatus::Deleting;
                Ok(true)
            })
            .await?;
        let key = format!("delete_workspace:{}", workspace_id);
        let input = DeleteWorkspaceInput {
            workspace_id: workspace_id.to_string(),
        };
        self.enqueue(WorkflowKind::DeleteWorkspace, &key, serde_json::to_value(&input)?)
            .await
    }

    /// Queue an answer for a question message.
    pub async fn start_answer_question(&self, message: &Message) -> Result<Uuid> {
        let key = format!("answer_question:{}", message.id);
        self.enqueue(WorkflowKind::AnswerQuestion, &key, serde_json::to_value(message)?)
            .await
    }

    /// Queue linking a user (`relation.parent`) with a workspace
    /// (`relation.embedded`).
    pub async fn start_connect_member(&self, relation: &EntityRelation) -> Result<Uuid> {
        let key = format!(
            "connect_member:{}:{}",
            relation.parent.id, relation.embedded.id
        );
        self.enqueue(WorkflowKind::ConnectMember, &key, serde_json::to_value(relation)?)
            .await
    }

    /// Requeue a failed run; it resumes after its last completed activity.
    pub async fn retry(&self, run_id: Uuid) -> Result<bool> {
        self.shared.workflows.retry(run_id).await
    }

    pub async fn run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        self.shared.workflows.get(run_id).await
    }

    async fn enqueue(
        &self,
        kind: WorkflowKind,
        instance_key: &str,
        input: serde_json::Value,
    ) -> Result<Uuid> {
        let run_id = self.shared.workflows.enqueue(kind, instance_key, input).await?;
        info!(
            subsystem = "jobs",
            component = "orchestrator",
            workflow_id = %run_id,
            workflow_kind = kind.as_str(),
            instance_key,
            "Workflow queued"
        );
        Ok(run_id)
    }
}

/// Links a user and a workspace, then tells the user.
pub struct ConnectMemberWorkflow {
    shared: Arc<Shared>,
}

#[async_trait]
impl WorkflowHandler for ConnectMemberWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ConnectMember
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let result: Result<()> = async {
            let relation: EntityRelation = ctx.input()?;
            let user = self.shared.mutator.connect(&relation).await?;
            self.shared
                .notifier
                .to_user(
                    &user.id,
                    NotificationEvent::UserMutateAddWorkspace,
                    &json!({ "workspace": relation.embedded }),
                )
                .await;
            Ok(())
        }
        .await;
        WorkflowOutcome::from_result(result)
    }
}
