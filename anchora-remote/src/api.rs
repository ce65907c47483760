//! Remote task service capability
//!
//! The engine talks to the service exclusively through this trait, so tests
//! can swap in an in-memory implementation and transports stay out of scope.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{DeltaPage, DeltaQuery, RemoteList, RemoteTask, TaskDraft};

#[async_trait]
pub trait TaskApi: Send + Sync {
    /// All task lists visible to the session
    async fn list_lists(&self) -> Result<Vec<RemoteList>>;

    /// All live tasks of a list
    async fn list_tasks(&self, list_id: &str) -> Result<Vec<RemoteTask>>;

    async fn get_task(&self, list_id: &str, task_id: &str) -> Result<RemoteTask>;

    async fn create_task(&self, list_id: &str, draft: &TaskDraft) -> Result<RemoteTask>;

    async fn update_task(
        &self,
        list_id: &str,
        task_id: &str,
        draft: &TaskDraft,
    ) -> Result<RemoteTask>;

    /// Associate a remote task with a local anchor. Idempotent; returns the
    /// linked-resource id.
    async fn upsert_linked_resource(
        &self,
        list_id: &str,
        task_id: &str,
        anchor_id: &str,
    ) -> Result<String>;

    /// One page of the incremental change feed. Must fail with
    /// [`ApiError::InvalidCursor`](crate::ApiError::InvalidCursor) when the
    /// service rejects a supplied cursor, distinguishable from other errors.
    async fn fetch_delta_page(&self, list_id: &str, query: &DeltaQuery) -> Result<DeltaPage>;
}
