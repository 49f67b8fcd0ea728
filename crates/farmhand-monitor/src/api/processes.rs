//! Lifecycle event endpoints for standalone processes and array members.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use farmhand_sched::monitoring::wire::{EventRequest, EventResponse};

use crate::dto::ProcessDescriptor;
use crate::error::ApiError;
use crate::model::ProcessTarget;
use crate::state::AppState;

async fn record(
    state: &AppState,
    label: &str,
    target: ProcessTarget,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let Json(request) = body?;
    let reply = state
        .store
        .record_event(label, &target, request.into())
        .await?;
    let status = if reply.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(reply)))
}

/// PATCH /api/v0/task/{label}/process/{name} - Record an event.
pub async fn patch_process(
    State(state): State<Arc<AppState>>,
    Path((label, name)): Path<(String, String)>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    record(&state, &label, ProcessTarget::Standalone(name), body).await
}

/// PATCH /api/v0/task/{label}/array/{array}/{job} - Record an event for an
/// array member.
pub async fn patch_member(
    State(state): State<Arc<AppState>>,
    Path((label, array, job)): Path<(String, String, u32)>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    record(&state, &label, ProcessTarget::ArrayMember { array, job }, body).await
}

/// GET /api/v0/task/{label}/process/{name}
pub async fn get_process(
    State(state): State<Arc<AppState>>,
    Path((label, name)): Path<(String, String)>,
) -> Result<Json<ProcessDescriptor>, ApiError> {
    let target = ProcessTarget::Standalone(name);
    Ok(Json(state.store.get_process(&label, &target).await?))
}

/// GET /api/v0/task/{label}/array/{array}/{job}
pub async fn get_member(
    State(state): State<Arc<AppState>>,
    Path((label, array, job)): Path<(String, String, u32)>,
) -> Result<Json<ProcessDescriptor>, ApiError> {
    let target = ProcessTarget::ArrayMember { array, job };
    Ok(Json(state.store.get_process(&label, &target).await?))
}
