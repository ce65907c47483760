//! Integration tests for the sync engine, driven end to end against the
//! in-memory task service and vault store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use anchora_remote::{ApiError, ChecklistItem, FakeTaskApi, RetryPolicy, TaskApi, TaskDraft};
use anchora_sync::{
    EngineState, MemoryCacheStore, SyncConfig, SyncError, SyncOrchestrator, SyncTrigger,
};
use anchora_vault::{scan_tasks, MemoryVaultStore, Priority};

const LIST: &str = "L1";
const TASKS_FILE: &str = "Tasks.md";

struct Harness {
    api: Arc<FakeTaskApi>,
    vault: Arc<MemoryVaultStore>,
    cache: Arc<MemoryCacheStore>,
    orch: Arc<SyncOrchestrator>,
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        default_list_id: LIST.to_string(),
        inbox_file: PathBuf::from("Inbox.md"),
        inter_list_delay: Duration::ZERO,
        min_sync_interval: Duration::from_millis(60),
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
        },
        ..SyncConfig::default()
    }
}

async fn harness() -> Harness {
    let api = Arc::new(FakeTaskApi::with_list(LIST));
    let vault = Arc::new(MemoryVaultStore::new());
    let cache = Arc::new(MemoryCacheStore::new());
    let orch = Arc::new(
        SyncOrchestrator::new(fast_config(), api.clone(), vault.clone(), cache.clone()).await,
    );
    Harness {
        api,
        vault,
        cache,
        orch,
    }
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft {
        title: title.to_string(),
        completed: false,
        priority: Priority::Normal,
        due_date: None,
        checklist: vec![],
    }
}

#[tokio::test]
async fn test_new_local_task_is_pushed() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;

    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.pushed(), 1);
    assert_eq!(report.pulled(), 0);
    assert_eq!(h.api.live_task_count(LIST), 1);

    let remote = h.api.task(LIST, "T1").unwrap();
    assert_eq!(remote.title, "Buy milk");
    assert_eq!(remote.linked_anchor.as_deref(), Some("abc123"));

    let cache = h.cache.snapshot().await.unwrap();
    let cached = cache.refs.get("abc123").unwrap();
    assert_eq!(cached.list_id, LIST);
    assert_eq!(cached.task_id, "T1");
    assert!(!cached.hash.is_empty());
    assert!(cache.cursors.get(LIST).unwrap().cursor.is_some());
}

#[tokio::test]
async fn test_unchanged_second_sync_is_noop() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;

    h.orch.sync_vault().await.unwrap();
    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.pushed(), 0);
    assert_eq!(report.pulled(), 0);
    assert_eq!(report.skipped(), 1);
    assert_eq!(h.api.create_count(), 1);
    assert_eq!(h.api.update_count(), 0);
}

#[tokio::test]
async fn test_completion_edit_pushes_update() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    // Marking the task done changes the semantic hash.
    h.vault
        .insert(TASKS_FILE, "- [x] Buy milk ^MSTDabc123\n")
        .await;
    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.pushed(), 1);
    assert_eq!(h.api.create_count(), 1);
    assert_eq!(h.api.update_count(), 1);
    assert!(h.api.task(LIST, "T1").unwrap().completed);
}

#[tokio::test]
async fn test_whitespace_only_edit_is_not_a_change() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    h.vault
        .insert(TASKS_FILE, "  - [ ]   Buy   milk ^MSTDabc123\n")
        .await;
    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.pushed(), 0);
    assert_eq!(h.api.update_count(), 0);
}

#[tokio::test]
async fn test_remote_task_is_materialized_with_full_fields() {
    let h = harness().await;
    let mut new = draft("From service");
    new.priority = Priority::High;
    new.due_date = NaiveDate::from_ymd_opt(2026, 9, 1);
    new.checklist.push(ChecklistItem {
        text: "first step".to_string(),
        completed: true,
    });
    h.api.create_task(LIST, &new).await.unwrap();

    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.pulled(), 1);

    let inbox = h.vault.get(Path::new("Inbox.md")).await.unwrap();
    let task = scan_tasks(&inbox).next().expect("task materialized");
    assert_eq!(task.title, "From service");
    assert_eq!(task.priority, Priority::High);
    assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2026, 9, 1));
    assert_eq!(task.subtasks.len(), 1);
    assert!(task.subtasks[0].completed);

    // The new anchor is linked back on the remote side.
    let remote = h.api.task(LIST, "T1").unwrap();
    assert_eq!(remote.linked_anchor.as_deref(), Some(task.anchor_id.as_str()));
}

#[tokio::test]
async fn test_push_then_pull_round_trip() {
    let h = harness().await;
    h.vault
        .insert(
            TASKS_FILE,
            "- [ ] Plan trip 🔽 📅 2026-10-05 ^MSTDtrip1\n    - [ ] Book flights\n",
        )
        .await;
    h.orch.sync_vault().await.unwrap();

    // Semantic fields survive the push.
    let remote = h.api.task(LIST, "T1").unwrap();
    assert_eq!(remote.title, "Plan trip");
    assert_eq!(remote.priority, Priority::Low);
    assert_eq!(remote.due_date, NaiveDate::from_ymd_opt(2026, 10, 5));
    assert_eq!(remote.checklist.len(), 1);

    // A remote edit comes back into the vault text.
    h.api.edit_task(LIST, "T1", |task| {
        task.title = "Plan the trip".to_string();
        task.checklist[0].completed = true;
    });
    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.pulled(), 1);

    let text = h.vault.get(Path::new(TASKS_FILE)).await.unwrap();
    let task = scan_tasks(&text).next().unwrap();
    assert_eq!(task.anchor_id, "trip1");
    assert_eq!(task.title, "Plan the trip");
    assert_eq!(task.priority, Priority::Low);
    assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2026, 10, 5));
    assert!(task.subtasks[0].completed);
}

#[tokio::test]
async fn test_conflict_resolves_remote_wins() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Draft report ^MSTDrep1\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    // Both sides edit before the next sync.
    h.vault
        .insert(TASKS_FILE, "- [ ] Draft report locally edited ^MSTDrep1\n")
        .await;
    h.api.edit_task(LIST, "T1", |task| {
        task.title = "Draft report remotely edited".to_string();
    });

    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.conflicts(), 1);
    assert_eq!(report.pushed(), 0);

    let text = h.vault.get(Path::new(TASKS_FILE)).await.unwrap();
    assert!(text.contains("Draft report remotely edited"));
    assert_eq!(
        h.api.task(LIST, "T1").unwrap().title,
        "Draft report remotely edited"
    );

    // Resolution leaves both sides consistent: the next run is a no-op.
    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.pushed(), 0);
    assert_eq!(report.pulled(), 0);
    assert_eq!(report.conflicts(), 0);
}

#[tokio::test]
async fn test_concurrent_vault_syncs_run_exactly_once() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.api.set_call_delay(Duration::from_millis(100));

    let first = tokio::spawn({
        let orch = h.orch.clone();
        async move { orch.sync_vault().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = tokio::spawn({
        let orch = h.orch.clone();
        async move { orch.sync_vault().await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let dropped = results
        .iter()
        .filter(|r| matches!(r, Err(SyncError::AlreadySyncing)))
        .count();
    assert_eq!(ok, 1, "exactly one execution");
    assert_eq!(dropped, 1, "the second request is dropped, not queued");
    assert_eq!(h.api.create_count(), 1);
}

#[tokio::test]
async fn test_min_interval_gates_triggers() {
    let h = harness().await;

    let first = h.orch.request_sync(SyncTrigger::Manual).await.unwrap();
    assert!(first.is_some(), "first trigger runs");

    let second = h.orch.request_sync(SyncTrigger::Manual).await.unwrap();
    assert!(second.is_none(), "trigger inside the interval is skipped");

    tokio::time::sleep(Duration::from_millis(80)).await;
    let third = h.orch.request_sync(SyncTrigger::Manual).await.unwrap();
    assert!(third.is_some(), "trigger after the interval runs");
}

#[tokio::test]
async fn test_rejected_cursor_falls_back_to_full_fetch() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    h.api.create_task(LIST, &draft("Appeared remotely")).await.unwrap();
    h.api.reject_next_cursor();

    // The engine must recover transparently and still see the new task.
    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.pulled(), 1);
    assert_eq!(report.errors(), 0);

    let inbox = h.vault.get(Path::new("Inbox.md")).await.unwrap();
    assert!(inbox.contains("Appeared remotely"));
}

#[tokio::test]
async fn test_removing_anchor_cleans_cache_and_leaves_remote() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    // The line is deleted locally; the remote task must survive.
    h.vault.insert(TASKS_FILE, "nothing tracked here\n").await;
    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.cleaned(), 1);
    assert_eq!(h.api.live_task_count(LIST), 1);
    let cache = h.cache.snapshot().await.unwrap();
    assert!(cache.refs.is_empty());
}

#[tokio::test]
async fn test_cache_loss_adopts_linked_remote_instead_of_duplicating() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.orch.sync_vault().await.unwrap();
    assert_eq!(h.api.create_count(), 1);

    // Fresh engine over the same vault and service, but an empty cache,
    // as after corruption recovery.
    let orch = SyncOrchestrator::new(
        fast_config(),
        h.api.clone(),
        h.vault.clone(),
        Arc::new(MemoryCacheStore::new()),
    )
    .await;
    let report = orch.sync_vault().await.unwrap();

    assert_eq!(report.pushed(), 1);
    assert_eq!(h.api.create_count(), 1, "no duplicate remote task");
    assert_eq!(h.api.update_count(), 1, "existing task adopted and updated");
    assert_eq!(h.api.live_task_count(LIST), 1);
}

#[tokio::test]
async fn test_unauthorized_aborts_the_run() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Buy milk ^MSTDabc123\n")
        .await;
    h.api.set_unauthorized(true);

    let result = h.orch.sync_vault().await;
    assert!(matches!(
        result,
        Err(SyncError::Api(ApiError::Unauthorized(_)))
    ));
    assert_eq!(h.orch.state().await, EngineState::Aborted);
    assert_eq!(h.api.create_count(), 0);
}

#[tokio::test]
async fn test_item_failure_is_contained() {
    let h = harness().await;
    h.vault
        .insert(
            TASKS_FILE,
            "- [ ] First ^MSTDaa1\n- [ ] Second ^MSTDbb2\n",
        )
        .await;
    h.api
        .fail_next_mutation(ApiError::Validation("rejected".to_string()));

    let report = h.orch.sync_vault().await.unwrap();

    assert_eq!(report.errors(), 1);
    assert_eq!(report.pushed(), 1);
    assert_eq!(h.api.live_task_count(LIST), 1);
    assert_eq!(h.orch.state().await, EngineState::Idle);
}

#[tokio::test]
async fn test_remote_deletion_drops_ref_then_repushes() {
    let h = harness().await;
    h.vault
        .insert(TASKS_FILE, "- [ ] Keep me ^MSTDkeep1\n")
        .await;
    h.orch.sync_vault().await.unwrap();

    h.api.delete_task(LIST, "T1");

    // The tombstone drops the pairing; local text is never deleted.
    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.cleaned(), 1);
    let text = h.vault.get(Path::new(TASKS_FILE)).await.unwrap();
    assert!(text.contains("Keep me"));

    // With the ref gone the local line counts as brand-new again.
    let report = h.orch.sync_vault().await.unwrap();
    assert_eq!(report.pushed(), 1);
    assert_eq!(h.api.live_task_count(LIST), 1);
}

#[tokio::test]
async fn test_pull_arms_cooldown_for_written_file() {
    let h = harness().await;
    h.api.create_task(LIST, &draft("Pulled task")).await.unwrap();
    h.orch.sync_vault().await.unwrap();

    // A file event for the inbox right after the pull must be suppressed;
    // an unrelated file is not.
    let inbox = h
        .orch
        .request_sync(SyncTrigger::FileChange("Inbox.md".to_string()))
        .await
        .unwrap();
    assert!(inbox.is_none(), "pull-induced write must not re-trigger");
}
