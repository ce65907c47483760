//! Local vault side of anchora
//!
//! This crate provides everything the sync engine needs on the local side:
//! - Task model with semantic hashing over meaning-bearing fields
//! - Scanning vault text for anchored task blocks
//! - Rewriting and appending task blocks when remote state is pulled
//! - The document-store capability trait, with filesystem and in-memory
//!   implementations
//! - A file watcher feeding modify events to the engine

pub mod edit;
pub mod errors;
pub mod scanner;
pub mod store;
pub mod task;
pub mod watcher;

pub use edit::{append_task_block, apply_patch_to_text, render_task_line};
pub use errors::{Result, VaultError};
pub use scanner::{scan_tasks, TaskScan};
pub use store::{FsVaultStore, MemoryVaultStore, VaultStore};
pub use task::{
    generate_anchor_id, Priority, Subtask, TaskPatch, TrackedTask, ANCHOR_PREFIX,
};
pub use watcher::VaultWatcher;
