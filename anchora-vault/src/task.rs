//! Tracked task model and semantic hashing

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Prefix of the anchor token that binds a task line to its remote identity.
/// The full token is the prefix followed by an alphanumeric suffix, appended
/// at the end of the task line.
pub const ANCHOR_PREFIX: &str = "^MSTD";

/// Task priority, carried as a marker token on the task line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Marker token rendered on the task line, if any
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Priority::Low => Some("🔽"),
            Priority::Normal => None,
            Priority::High => Some("⏫"),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

/// A checkbox line nested under a task line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub text: String,
    pub completed: bool,
}

/// A task discovered in vault text, identified by its anchor token.
///
/// Recomputed from source text on every scan pass; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTask {
    /// Anchor suffix, without the `^MSTD` prefix
    pub anchor_id: String,
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub subtasks: Vec<Subtask>,
    /// Indented free-text lines under the task. Not part of the task's
    /// meaning; excluded from the semantic hash.
    pub notes: Vec<String>,
    /// Zero-based line offset of the task line in its source text.
    /// Incidental; excluded from the semantic hash.
    pub line_no: usize,
}

impl TrackedTask {
    /// Digest over the meaning-bearing fields only. Whitespace, marker
    /// ordering, notes, and line position do not affect the result, so
    /// touching a file without changing meaning does not look like an edit.
    pub fn semantic_hash(&self) -> String {
        hash_semantic_fields(
            &self.title,
            self.completed,
            self.priority,
            self.due_date,
            &self.subtasks,
        )
    }
}

/// The semantic fields of a task, detached from any source location.
///
/// Used to write remote state into vault text; hashing a patch yields the
/// same digest the resulting [`TrackedTask`] would produce.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPatch {
    pub title: String,
    pub completed: bool,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub subtasks: Vec<Subtask>,
}

impl TaskPatch {
    pub fn semantic_hash(&self) -> String {
        hash_semantic_fields(
            &self.title,
            self.completed,
            self.priority,
            self.due_date,
            &self.subtasks,
        )
    }
}

impl From<&TrackedTask> for TaskPatch {
    fn from(task: &TrackedTask) -> Self {
        Self {
            title: task.title.clone(),
            completed: task.completed,
            priority: task.priority,
            due_date: task.due_date,
            subtasks: task.subtasks.clone(),
        }
    }
}

fn hash_semantic_fields(
    title: &str,
    completed: bool,
    priority: Priority,
    due_date: Option<NaiveDate>,
    subtasks: &[Subtask],
) -> String {
    let mut hasher = blake3::Hasher::new();

    // Fields in fixed order, with separators so adjacent fields cannot
    // run together and collide.
    hasher.update(title.trim().as_bytes());
    hasher.update(&[0x1f, completed as u8, priority.code()]);
    match due_date {
        Some(date) => hasher.update(date.format("%Y-%m-%d").to_string().as_bytes()),
        None => hasher.update(b"-"),
    };
    for subtask in subtasks {
        hasher.update(&[0x1e]);
        hasher.update(subtask.text.trim().as_bytes());
        hasher.update(&[0x1f, subtask.completed as u8]);
    }

    hasher.finalize().to_hex().to_string()
}

/// Generate a fresh anchor suffix, unique for practical purposes
pub fn generate_anchor_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let random: u32 = rand::random();
    format!("{:x}{:08x}", timestamp, random)
}
