//! # atrium-jobs
//!
//! Workspace lifecycle orchestration for atrium.
//!
//! This crate provides:
//! - The workspace orchestrator and its workflows (provision, delete-source,
//!   delete-workspace, question answering, member connection)
//! - Bounded polling of knowledge base operations
//! - Two-sided membership edits and the invitation flow
//! - A durable workflow worker with checkpointed resume, concurrency limits
//!   and worker events via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use atrium_jobs::{OrchestratorConfig, OrchestratorDeps, WorkerBuilder, WorkerConfig, WorkspaceOrchestrator};
//!
//! let orchestrator = WorkspaceOrchestrator::new(deps, OrchestratorConfig::from_env());
//!
//! let worker = WorkerBuilder::new(workflows.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handlers(orchestrator.handlers())
//!     .build()
//!     .await;
//! let handle = worker.start();
//!
//! orchestrator.start_provision(&workspace).await?;
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod invitations;
pub mod mutator;
pub mod notifier;
pub mod orchestrator;
pub mod poll;
pub mod worker;

// Re-export core types
pub use atrium_core::*;

pub use handler::{WorkflowContext, WorkflowHandler, WorkflowOutcome};
pub use invitations::{AcceptOutcome, InvitationFlow, LoggingInvitationDelivery, NewInvitation};
pub use mutator::MembershipMutator;
pub use notifier::Notifier;
pub use orchestrator::{
    AnswerQuestionWorkflow, ConnectMemberWorkflow, DeleteSourceInput, DeleteSourceWorkflow,
    DeleteWorkspaceInput, DeleteWorkspaceWorkflow, OrchestratorConfig, OrchestratorDeps,
    ProvisionInput, ProvisionWorkflow, WorkspaceOrchestrator,
};
pub use poll::{OperationPoller, PollPolicy};
pub use worker::{WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle, WorkflowWorker};
