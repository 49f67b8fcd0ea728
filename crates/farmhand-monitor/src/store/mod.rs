//! Persistence for the monitoring event store.

mod sqlite;

pub use sqlite::SqliteEventStore;

use async_trait::async_trait;
use farmhand_sched::monitoring::wire::EventResponse;

use crate::dto::{ProcessDescriptor, TaskDescriptor, TaskSummary};
use crate::error::StoreResult;
use crate::model::{NewEvent, NewTask, ProcessTarget};

/// Trait for event store backends.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create a task. An existing label is a `Conflict` and leaves the
    /// stored task untouched.
    async fn create_task(&self, task: NewTask) -> StoreResult<()>;

    /// All tasks, newest first.
    async fn list_tasks(&self) -> StoreResult<Vec<TaskSummary>>;

    /// Load a task descriptor.
    async fn get_task(&self, label: &str) -> StoreResult<Option<TaskDescriptor>>;

    /// Append an event, creating the process on first contact.
    async fn record_event(
        &self,
        label: &str,
        target: &ProcessTarget,
        event: NewEvent,
    ) -> StoreResult<EventResponse>;

    /// Load a process with its event history.
    async fn get_process(
        &self,
        label: &str,
        target: &ProcessTarget,
    ) -> StoreResult<ProcessDescriptor>;
}
