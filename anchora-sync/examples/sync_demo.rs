//! Example demonstrating a full sync cycle against the in-memory service
//!
//! Writes an anchored task into a temporary vault, runs a vault sync, edits
//! the task on the "remote" side, and syncs again to pull the edit back.

use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use anchora_remote::{ChecklistItem, FakeTaskApi, TaskApi, TaskDraft};
use anchora_sync::{JsonCacheStore, SyncConfig, SyncOrchestrator};
use anchora_vault::{FsVaultStore, Priority};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let temp_dir = tempdir()?;
    let vault_dir = temp_dir.path().join("vault");
    tokio::fs::create_dir_all(&vault_dir).await?;

    // A vault with one anchored task.
    tokio::fs::write(
        vault_dir.join("Tasks.md"),
        "- [ ] Water the plants 📅 2026-08-10 ^MSTDdemo1\n    - [ ] Refill the can\n",
    )
    .await?;

    let api = Arc::new(FakeTaskApi::with_list("Tasks"));
    let vault = Arc::new(FsVaultStore::new(&vault_dir));
    let cache = Arc::new(JsonCacheStore::new(temp_dir.path().join("sync-cache.json")));

    let config = SyncConfig {
        inter_list_delay: std::time::Duration::ZERO,
        ..SyncConfig::default()
    };
    let orchestrator = SyncOrchestrator::new(config, api.clone(), vault, cache).await;

    println!("=== First sync: push the local task ===");
    let report = orchestrator.sync_vault().await?;
    println!("summary: {}", report.summary());

    // Something happens on the service side.
    api.edit_task("Tasks", "T1", |task| {
        task.completed = true;
    });
    api.create_task(
        "Tasks",
        &TaskDraft {
            title: "Appeared on the service".to_string(),
            completed: false,
            priority: Priority::High,
            due_date: None,
            checklist: vec![ChecklistItem {
                text: "from the checklist".to_string(),
                completed: false,
            }],
        },
    )
    .await?;

    println!("\n=== Second sync: pull remote changes ===");
    let report = orchestrator.sync_vault().await?;
    println!("summary: {}", report.summary());

    let tasks_file = tokio::fs::read_to_string(vault_dir.join("Tasks.md")).await?;
    let inbox = tokio::fs::read_to_string(vault_dir.join("Inbox.md")).await?;
    print_file("Tasks.md", &tasks_file);
    print_file("Inbox.md", &inbox);

    Ok(())
}

fn print_file(name: &str, text: &str) {
    println!("\n--- {} ---", Path::new(name).display());
    print!("{}", text);
}
