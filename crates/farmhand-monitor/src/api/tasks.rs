//! Task endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use farmhand_sched::monitoring::wire::TaskCreate;

use crate::dto::{TaskDescriptor, TaskSummary};
use crate::error::ApiError;
use crate::model::NewTask;
use crate::state::AppState;

/// GET /api/v0/tasks - List tasks, newest first.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskSummary>>, ApiError> {
    Ok(Json(state.store.list_tasks().await?))
}

/// PUT /api/v0/task/{label} - Create a task.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Path(label): Path<String>,
    body: Result<Json<TaskCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskDescriptor>), ApiError> {
    let Json(request) = body?;
    let task = NewTask::from_request(&label, request)?;
    state.store.create_task(task).await?;

    let descriptor = state
        .store
        .get_task(&label)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Task {label} vanished after creation")))?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

/// GET /api/v0/task/{label} - Task descriptor.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(label): Path<String>,
) -> Result<Json<TaskDescriptor>, ApiError> {
    state
        .store
        .get_task(&label)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task not found: {label}")))
}
