//! Synchronization engine for anchora
//!
//! This crate keeps anchored tasks in a local vault consistent with a remote
//! task service. It provides:
//! - The persisted identity cache mapping anchors to remote tasks, with
//!   per-list delta cursors
//! - Pure reconciliation deciding push, pull, no-op, or conflict per anchor
//! - Debounce, cooldown, and minimum-interval throttling of sync triggers
//! - The orchestrator driving per-list and whole-vault passes and the
//!   event loop tying file events and timers together

pub mod cache;
pub mod errors;
pub mod orchestrator;
pub mod progress;
pub mod reconcile;
pub mod throttle;

pub use cache::{
    CacheStore, IdentityStore, JsonCacheStore, ListCursor, MemoryCacheStore, RemoteRef,
    SyncCache, CACHE_VERSION,
};
pub use errors::{Result, SyncError};
pub use orchestrator::{EngineState, SyncConfig, SyncOrchestrator, SyncTrigger};
pub use progress::{ListReport, VaultReport};
pub use reconcile::{decide, decide_in_pass, SyncDecision};
pub use throttle::{Cooldown, Debouncer, MinInterval};
