//! Axum server setup and routing.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, put},
};
use farmhand_sched::monitoring::wire::API_PREFIX;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(api::health::health))
        .route("/tasks", get(api::tasks::list_tasks))
        .route(
            "/task/{label}",
            put(api::tasks::create_task).get(api::tasks::get_task),
        )
        .route(
            "/task/{label}/process/{name}",
            get(api::processes::get_process).patch(api::processes::patch_process),
        )
        .route(
            "/task/{label}/array/{array}/{job}",
            get(api::processes::get_member).patch(api::processes::patch_member),
        );

    Router::new()
        .nest(API_PREFIX, api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
