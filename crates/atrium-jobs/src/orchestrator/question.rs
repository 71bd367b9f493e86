//! Question-Answer: query the knowledge base scoped to the workspace and
//! broadcast a synthetic bot response.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument};

use atrium_core::{
    defaults, GenericRef, KbQuery, Message, MessageType, MetadataPair, NotificationEvent, Result,
    WorkflowKind, Workspace,
};

use super::Shared;
use crate::handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};

pub struct AnswerQuestionWorkflow {
    shared: Arc<Shared>,
}

impl AnswerQuestionWorkflow {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[instrument(
        skip(self, question),
        fields(subsystem = "jobs", component = "orchestrator", op = "answer_question", workspace_id = %question.workspace_id, message_id = %question.id)
    )]
    async fn answer(&self, question: &Message) -> Result<Message> {
        let workspace: Workspace = self.shared.entities.require(&question.workspace_id).await?;

        let query = KbQuery {
            question: question.body.clone(),
            direct_id: question.target_id.clone(),
            top: self.shared.config.answer_top,
            score_threshold: self.shared.config.answer_score_threshold,
            filters: vec![MetadataPair::new(
                defaults::KB_WORKSPACE_TAG,
                workspace.id.as_str(),
            )],
        };
        let answers = self
            .shared
            .kb
            .query(&self.shared.config.kb_id, &query)
            .await?;
        info!(result_count = answers.len(), "Question answered");

        Ok(Message {
            id: format!("{}{}", defaults::BOT_RESPONSE_ID_PREFIX, question.id),
            workspace_id: workspace.id,
            created_at: Utc::now(),
            parent_message_id: Some(question.id.clone()),
            title: question.title.clone(),
            body: serde_json::to_string(&json!({ "answers": answers }))?,
            target_id: question.target_id.clone(),
            author: GenericRef::new("", self.shared.config.bot_display_name.as_str()),
            posted: true,
            message_type: MessageType::BotResponse,
        })
    }
}

#[async_trait]
impl WorkflowHandler for AnswerQuestionWorkflow {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::AnswerQuestion
    }

    /// Failures are terminal; a question is not re-asked automatically.
    async fn execute(&self, ctx: &mut WorkflowContext) -> WorkflowOutcome {
        let question: Message = match ctx.input() {
            Ok(question) => question,
            Err(e) => return WorkflowOutcome::Failed(e.to_string()),
        };
        match self.answer(&question).await {
            Ok(response) => {
                self.shared
                    .notifier
                    .to_group(
                        &response.workspace_id,
                        NotificationEvent::QnaQuestionAnswered,
                        &response,
                    )
                    .await;
                WorkflowOutcome::Completed
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    workflow_id = %ctx.run_id(),
                    workspace_id = %question.workspace_id,
                    error = %e,
                    "Question could not be answered"
                );
                WorkflowOutcome::Failed(e.to_string())
            }
        }
    }
}
