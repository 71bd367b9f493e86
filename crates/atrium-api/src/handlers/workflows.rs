//! Workflow run inspection and manual retry.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use atrium_core::{WorkflowRun, WorkflowStats};

use crate::{ApiError, AppState, Caller};

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub run_id: Uuid,
    /// False when the run was not in a failed state.
    pub requeued: bool,
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Caller(_identity): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, ApiError> {
    let run = state
        .orchestrator
        .run(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow run {} not found", id)))?;
    Ok(Json(run))
}

/// Requeue a failed run from its last checkpoint.
pub async fn retry_workflow(
    State(state): State<AppState>,
    Caller(_identity): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, ApiError> {
    if state.orchestrator.run(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("workflow run {} not found", id)));
    }
    let requeued = state.orchestrator.retry(id).await?;
    Ok(Json(RetryResponse {
        run_id: id,
        requeued,
    }))
}

pub async fn workflow_stats(
    State(state): State<AppState>,
    Caller(_identity): Caller,
) -> Result<Json<WorkflowStats>, ApiError> {
    let stats = state.workflows.stats().await?;
    Ok(Json(stats))
}
