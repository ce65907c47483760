//! Remote task service data model

use anchora_vault::{Priority, Subtask, TaskPatch, TrackedTask};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A task list on the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteList {
    pub list_id: String,
    pub name: String,
}

/// One item of a remote task's checklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    pub completed: bool,
}

/// A task as the remote service reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub list_id: String,
    pub task_id: String,
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub checklist: Vec<ChecklistItem>,
    /// Service-side last-modified marker
    pub last_modified: DateTime<Utc>,
    /// Anchor suffix stored in the linked resource, when one exists
    pub linked_anchor: Option<String>,
    /// Delta feeds report removals as tombstones
    pub deleted: bool,
}

impl RemoteTask {
    /// Semantic fields of this task, in local-patch form
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: self.title.clone(),
            completed: self.completed,
            priority: self.priority,
            due_date: self.due_date,
            subtasks: self
                .checklist
                .iter()
                .map(|item| Subtask {
                    text: item.text.clone(),
                    completed: item.completed,
                })
                .collect(),
        }
    }
}

/// Fields sent to the service when creating or updating a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub checklist: Vec<ChecklistItem>,
}

impl From<&TrackedTask> for TaskDraft {
    fn from(task: &TrackedTask) -> Self {
        Self {
            title: task.title.clone(),
            completed: task.completed,
            priority: task.priority,
            due_date: task.due_date,
            checklist: task
                .subtasks
                .iter()
                .map(|sub| ChecklistItem {
                    text: sub.text.clone(),
                    completed: sub.completed,
                })
                .collect(),
        }
    }
}

/// What to ask the delta endpoint for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaQuery {
    /// Full enumeration, first sync or cursor fallback
    Initial,
    /// Changes since a previously issued cursor
    Cursor(String),
    /// Continuation of a paginated response
    Page(String),
}

/// One page of a delta (or full enumeration) response
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    pub tasks: Vec<RemoteTask>,
    /// More pages follow
    pub next_link: Option<String>,
    /// Final page; the cursor for the next incremental fetch
    pub delta_link: Option<String>,
}

/// All pages of one fetch, accumulated into a coherent snapshot
#[derive(Debug, Clone, Default)]
pub struct DeltaSnapshot {
    pub tasks: Vec<RemoteTask>,
    pub new_cursor: Option<String>,
    /// Whether this was a full enumeration rather than an incremental feed.
    /// In a full snapshot, absence means the task no longer exists; in an
    /// incremental one it means the task is unchanged.
    pub full: bool,
}
