//! Farmhand monitor: event-sourced tracking of remote batch processes.
//!
//! Submitters register a task with the processes they expect; running jobs
//! then report `started`, `beat` and `terminated` events over HTTP. Each
//! process follows `unstarted → active → terminated`, and every event is kept
//! in arrival order.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use farmhand_monitor::{AppState, MonitorConfig, create_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MonitorConfig::default();
//!     let store = Arc::new(config.open_store()?);
//!     let state = Arc::new(AppState::new(config.clone(), store));
//!
//!     let app = create_router(state);
//!     let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod dto;
pub mod error;
pub mod model;
pub mod server;
pub mod state;
pub mod store;

pub use dto::{
    ArrayDescriptor, EventRecord, HealthResponse, ProcessDescriptor, ProcessSummary,
    TaskDescriptor, TaskSummary,
};
pub use error::{ApiError, StoreError, StoreResult};
pub use model::{Declaration, NewEvent, NewTask, ProcessTarget};
pub use server::create_router;
pub use state::{AppState, MonitorConfig};
pub use store::{EventStore, SqliteEventStore};
