//! Sync orchestration
//!
//! Drives one list's pass (scan → fetch → reconcile → apply → persist) and
//! the whole-vault run, and owns the event loop that turns file events and
//! timers into throttled sync requests. The orchestrator is the only writer
//! of the identity cache and cursors; the scanner and fetcher are read-only
//! with respect to persisted state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use anchora_remote::{
    with_retry, ApiError, DeltaFetcher, RemoteTask, RetryPolicy, TaskApi, TaskDraft,
};
use anchora_vault::{
    append_task_block, apply_patch_to_text, generate_anchor_id, scan_tasks, TrackedTask,
    VaultError, VaultStore, VaultWatcher,
};

use crate::cache::{CacheStore, IdentityStore, RemoteRef};
use crate::errors::{Result, SyncError};
use crate::progress::{ListReport, VaultReport};
use crate::reconcile::{decide_in_pass, SyncDecision};
use crate::throttle::{Cooldown, Debouncer, MinInterval};

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// List that brand-new local tasks are pushed to
    pub default_list_id: String,
    /// File where previously-unseen remote tasks are materialized
    pub inbox_file: PathBuf,
    pub debounce_window: Duration,
    pub cooldown: Duration,
    pub min_sync_interval: Duration,
    pub inter_list_delay: Duration,
    pub startup_delay: Duration,
    /// Periodic full-vault sync; `None` disables the timer
    pub periodic_interval: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_list_id: "Tasks".to_string(),
            inbox_file: PathBuf::from("Inbox.md"),
            debounce_window: Duration::from_secs(2),
            cooldown: Duration::from_secs(5),
            min_sync_interval: Duration::from_secs(30),
            inter_list_delay: Duration::from_secs(1),
            startup_delay: Duration::from_secs(10),
            periodic_interval: Some(Duration::from_secs(30 * 60)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Observable engine state for one sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
    Reconciling,
    Applying,
    Persisting,
    /// Terminal for the run; reached only on unrecoverable failure
    Aborted,
}

/// Why a sync run was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    /// Debounced file modification; carries the source id for cooldown
    FileChange(String),
    Periodic,
    Manual,
}

impl SyncTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::FileChange(_) => "file-change",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Manual => "manual",
        }
    }

    fn source_id(&self) -> Option<&str> {
        match self {
            SyncTrigger::FileChange(source) => Some(source),
            _ => None,
        }
    }
}

struct Throttles {
    debounce: Debouncer,
    cooldown: Cooldown,
    min_interval: MinInterval,
}

struct LocalEntry {
    path: PathBuf,
    task: TrackedTask,
}

struct PlannedPush {
    anchor: String,
    task: TrackedTask,
    /// Existing remote target (task id, linked resource id); `None` creates
    existing: Option<(String, Option<String>)>,
}

struct PlannedPull {
    anchor: String,
    path: PathBuf,
    remote: RemoteTask,
    conflict: bool,
}

/// Main sync orchestrator
pub struct SyncOrchestrator {
    config: SyncConfig,
    api: Arc<dyn TaskApi>,
    vault: Arc<dyn VaultStore>,
    fetcher: DeltaFetcher,
    identity: Mutex<IdentityStore>,
    throttle: Mutex<Throttles>,
    state: RwLock<EngineState>,
    run_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub async fn new(
        config: SyncConfig,
        api: Arc<dyn TaskApi>,
        vault: Arc<dyn VaultStore>,
        cache_store: Arc<dyn CacheStore>,
    ) -> Self {
        let identity = IdentityStore::load(cache_store).await;
        let fetcher = DeltaFetcher::new(api.clone(), config.retry.clone());
        let throttle = Throttles {
            debounce: Debouncer::new(config.debounce_window),
            cooldown: Cooldown::new(config.cooldown),
            min_interval: MinInterval::new(config.min_sync_interval),
        };
        Self {
            config,
            api,
            vault,
            fetcher,
            identity: Mutex::new(identity),
            throttle: Mutex::new(throttle),
            state: RwLock::new(EngineState::Idle),
            run_lock: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> EngineState {
        self.state.read().await.clone()
    }

    /// Clear the identity cache and all cursors; the next run refetches and
    /// re-reconciles everything
    pub async fn reset_cache(&self) {
        self.identity.lock().await.reset_all().await;
    }

    async fn set_state(&self, state: EngineState) {
        *self.state.write().await = state;
    }

    /// Sync one list: scan, fetch, reconcile, apply, persist.
    ///
    /// Item-level failures are counted in the report; only batch-level
    /// failures (auth, connectivity after retries) surface as errors.
    pub async fn sync_list(&self, list_id: &str) -> Result<ListReport> {
        self.set_state(EngineState::Scanning).await;
        let result = self.sync_list_inner(list_id).await;
        match &result {
            Ok(_) => self.set_state(EngineState::Idle).await,
            Err(e) if e.is_fatal() => self.set_state(EngineState::Aborted).await,
            Err(_) => self.set_state(EngineState::Idle).await,
        }
        result
    }

    async fn sync_list_inner(&self, list_id: &str) -> Result<ListReport> {
        let mut report = ListReport::new(list_id);

        let (locals, mut texts) = self.scan_vault().await?;

        let cursor = {
            let identity = self.identity.lock().await;
            identity.cursor(list_id).map(str::to_string)
        };
        let snapshot = self.fetcher.fetch(list_id, cursor.as_deref()).await?;

        self.set_state(EngineState::Reconciling).await;

        let mut by_anchor: HashMap<&str, &RemoteTask> = HashMap::new();
        let mut by_task: HashMap<&str, &RemoteTask> = HashMap::new();
        for task in &snapshot.tasks {
            by_task.insert(task.task_id.as_str(), task);
            if let Some(anchor) = task.linked_anchor.as_deref() {
                by_anchor.insert(anchor, task);
            }
        }

        let mut pushes: Vec<PlannedPush> = Vec::new();
        let mut pulls: Vec<PlannedPull> = Vec::new();
        let mut materializes: Vec<RemoteTask> = Vec::new();
        let mut forgets: Vec<String> = Vec::new();

        {
            let identity = self.identity.lock().await;

            // Anchors in play this pass: local tasks bound to the list plus
            // every cached ref pointing at it. Deterministic order.
            let mut anchors: BTreeSet<String> = BTreeSet::new();
            for anchor in locals.keys() {
                let bound = match identity.get(anchor) {
                    Some(cached) => cached.list_id == list_id,
                    None => list_id == self.config.default_list_id,
                };
                if bound {
                    anchors.insert(anchor.clone());
                }
            }
            for (anchor, _) in identity.refs_for_list(list_id) {
                anchors.insert(anchor);
            }

            for anchor in &anchors {
                let local = locals.get(anchor.as_str()).map(|entry| &entry.task);
                let cached = identity.get(anchor);
                let remote = by_anchor
                    .get(anchor.as_str())
                    .copied()
                    .or_else(|| cached.and_then(|r| by_task.get(r.task_id.as_str()).copied()));
                // A remote task already carrying this anchor but missing
                // from the cache (e.g. after a cache reset) is adopted as
                // the push target instead of being duplicated.
                let adopted = match cached {
                    None => by_anchor.get(anchor.as_str()).copied(),
                    Some(_) => None,
                };

                match decide_in_pass(local, remote, cached, snapshot.full) {
                    SyncDecision::PushLocal => {
                        if let Some(task) = local {
                            let existing = cached
                                .map(|r| (r.task_id.clone(), r.linked_resource_id.clone()))
                                .or_else(|| adopted.map(|t| (t.task_id.clone(), None)));
                            pushes.push(PlannedPush {
                                anchor: anchor.clone(),
                                task: task.clone(),
                                existing,
                            });
                        }
                    }
                    decision @ (SyncDecision::PullRemote | SyncDecision::Conflict) => {
                        if let (Some(entry), Some(remote_task)) =
                            (locals.get(anchor.as_str()), remote)
                        {
                            pulls.push(PlannedPull {
                                anchor: anchor.clone(),
                                path: entry.path.clone(),
                                remote: remote_task.clone(),
                                conflict: decision == SyncDecision::Conflict,
                            });
                        }
                    }
                    SyncDecision::NoOp => report.skipped += 1,
                    SyncDecision::ForgetLocal => forgets.push(anchor.clone()),
                }
            }

            // Remote tasks bound to no known anchor get materialized.
            for task in &snapshot.tasks {
                if task.deleted {
                    continue;
                }
                let anchor_known = task
                    .linked_anchor
                    .as_deref()
                    .map(|a| locals.contains_key(a) || identity.get(a).is_some())
                    .unwrap_or(false);
                let ref_known = identity.find_by_task(list_id, &task.task_id).is_some();
                if !anchor_known && !ref_known {
                    materializes.push(task.clone());
                }
            }
        }

        self.set_state(EngineState::Applying).await;

        // Pushes go first so a just-pushed item cannot be misread as a
        // conflicting pull later in the same pass.
        for push in &pushes {
            match self.apply_push(list_id, push).await {
                Ok(()) => report.pushed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(anchor = %push.anchor, "push failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        for pull in &pulls {
            match self.apply_pull(list_id, pull, &mut texts).await {
                Ok(()) => {
                    if pull.conflict {
                        report.conflicts += 1;
                    } else {
                        report.pulled += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(anchor = %pull.anchor, "pull failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        for remote in &materializes {
            match self.apply_materialize(list_id, remote, &mut texts).await {
                Ok(()) => report.pulled += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(task = %remote.task_id, "pull of new remote task failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        for anchor in &forgets {
            if self.identity.lock().await.remove(anchor).await {
                debug!(anchor = %anchor, "forgot dead pairing");
                report.cleaned += 1;
            }
        }

        self.set_state(EngineState::Persisting).await;
        {
            let mut identity = self.identity.lock().await;
            identity.set_cursor(list_id, snapshot.new_cursor.clone()).await;
            identity.flush().await;
        }

        debug!(
            list = list_id,
            pushed = report.pushed,
            pulled = report.pulled,
            skipped = report.skipped,
            conflicts = report.conflicts,
            cleaned = report.cleaned,
            errors = report.errors,
            "list sync finished"
        );
        Ok(report)
    }

    /// Sync every remote list sequentially, then clean up stale refs.
    ///
    /// At most one execution runs at a time; a request arriving while one
    /// is active is dropped, not queued.
    pub async fn sync_vault(&self) -> Result<VaultReport> {
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("sync already in progress, dropping request");
                return Err(SyncError::AlreadySyncing);
            }
        };

        let lists = match with_retry(&self.config.retry, "list lists", || self.api.list_lists())
            .await
        {
            Ok(lists) => lists,
            Err(e) => {
                let err = SyncError::from(e);
                let next = if err.is_fatal() {
                    EngineState::Aborted
                } else {
                    EngineState::Idle
                };
                self.set_state(next).await;
                warn!("sync aborted before any list: {}", err);
                return Err(err);
            }
        };

        let mut report = VaultReport::default();
        for (index, list) in lists.iter().enumerate() {
            if index > 0 && !self.config.inter_list_delay.is_zero() {
                tokio::time::sleep(self.config.inter_list_delay).await;
            }
            match self.sync_list(&list.list_id).await {
                Ok(list_report) => report.lists.push(list_report),
                Err(e) => {
                    warn!(
                        list = %list.list_id,
                        remaining = lists.len() - index - 1,
                        "sync batch aborted: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        // Cleanup pass: anchors gone from the vault lose their cache entry;
        // the remote side is untouched.
        let (locals, _) = self.scan_vault().await?;
        let live: HashSet<String> = locals.keys().cloned().collect();
        report.cleaned_stale = self.identity.lock().await.remove_stale(&live).await.len();

        info!("sync complete: {}", report.summary());
        Ok(report)
    }

    /// Throttled entry point used by every trigger origin.
    ///
    /// Returns `Ok(None)` when the request was skipped by the cooldown, the
    /// minimum interval, or an already-running sync.
    pub async fn request_sync(&self, trigger: SyncTrigger) -> Result<Option<VaultReport>> {
        {
            let mut throttle = self.throttle.lock().await;
            if let Some(source) = trigger.source_id() {
                if throttle.cooldown.suppressed(source) {
                    debug!(source = source, "trigger suppressed by cooldown");
                    return Ok(None);
                }
            }
            if let Err(remaining) = throttle.min_interval.try_acquire() {
                debug!(
                    trigger = trigger.label(),
                    remaining_ms = remaining.as_millis() as u64,
                    "sync request inside minimum interval, skipping"
                );
                return Ok(None);
            }
        }

        match self.sync_vault().await {
            Ok(summary) => {
                if let Some(source) = trigger.source_id() {
                    self.throttle.lock().await.cooldown.start(source);
                }
                Ok(Some(summary))
            }
            Err(SyncError::AlreadySyncing) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Event loop: file events feed the debouncer; startup and periodic
    /// timers request syncs. Returning from this function cancels every
    /// pending timer; an in-flight remote call is abandoned, not cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PathBuf>,
        watcher: Option<VaultWatcher>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        // Holding the subscription here ties its lifetime to the loop.
        let _watcher = watcher;

        let startup = tokio::time::sleep(self.config.startup_delay);
        tokio::pin!(startup);
        let mut startup_done = false;

        let mut tick = tokio::time::interval(Duration::from_millis(200));

        let mut periodic = self.config.periodic_interval.map(|every| {
            tokio::time::interval_at(tokio::time::Instant::now() + every, every)
        });

        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("sync loop shutting down");
                    break;
                }
                _ = &mut startup, if !startup_done => {
                    startup_done = true;
                    self.handle_trigger(SyncTrigger::Startup).await;
                }
                event = events.recv(), if events_open => match event {
                    Some(path) => {
                        let source = path.to_string_lossy().to_string();
                        self.throttle.lock().await.debounce.trigger(&source);
                    }
                    None => events_open = false,
                },
                _ = tick.tick() => {
                    let ready = {
                        let mut throttle = self.throttle.lock().await;
                        throttle.debounce.ready()
                    };
                    for source in ready {
                        self.handle_trigger(SyncTrigger::FileChange(source)).await;
                    }
                }
                _ = async {
                    match periodic.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.handle_trigger(SyncTrigger::Periodic).await;
                }
            }
        }
    }

    async fn handle_trigger(&self, trigger: SyncTrigger) {
        match self.request_sync(trigger.clone()).await {
            Ok(Some(report)) => {
                debug!(trigger = trigger.label(), "sync run finished: {}", report.summary());
            }
            Ok(None) => {}
            Err(e) => error!(trigger = trigger.label(), "sync run failed: {}", e),
        }
    }

    async fn scan_vault(&self) -> Result<(HashMap<String, LocalEntry>, HashMap<PathBuf, String>)> {
        let mut by_anchor: HashMap<String, LocalEntry> = HashMap::new();
        let mut texts: HashMap<PathBuf, String> = HashMap::new();

        for path in self.vault.list_files().await? {
            let text = self.vault.read_file(&path).await?;
            for task in scan_tasks(&text) {
                if by_anchor.contains_key(&task.anchor_id) {
                    warn!(
                        anchor = %task.anchor_id,
                        file = %path.display(),
                        "duplicate anchor, keeping first occurrence"
                    );
                    continue;
                }
                by_anchor.insert(
                    task.anchor_id.clone(),
                    LocalEntry {
                        path: path.clone(),
                        task,
                    },
                );
            }
            texts.insert(path, text);
        }

        Ok((by_anchor, texts))
    }

    async fn read_or_empty(&self, path: &Path) -> Result<String> {
        match self.vault.read_file(path).await {
            Ok(text) => Ok(text),
            Err(VaultError::FileNotFound(_)) => Ok(String::new()),
            Err(VaultError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_push(&self, list_id: &str, push: &PlannedPush) -> Result<()> {
        let draft = TaskDraft::from(&push.task);

        let (remote, linked) = match &push.existing {
            Some((task_id, linked_id)) => {
                let updated = with_retry(&self.config.retry, "update task", || {
                    self.api.update_task(list_id, task_id, &draft)
                })
                .await?;
                (updated, linked_id.clone())
            }
            None => {
                let created = with_retry(&self.config.retry, "create task", || {
                    self.api.create_task(list_id, &draft)
                })
                .await?;
                let linked = match with_retry(&self.config.retry, "link resource", || {
                    self.api
                        .upsert_linked_resource(list_id, &created.task_id, &push.anchor)
                })
                .await
                {
                    Ok(id) => Some(id),
                    Err(e @ ApiError::Unauthorized(_)) => return Err(e.into()),
                    Err(e) => {
                        // The ref still maps by task id; the back-reference
                        // can be repaired on a later push.
                        warn!(anchor = %push.anchor, "linked resource creation failed: {}", e);
                        None
                    }
                };
                (created, linked)
            }
        };

        let mut identity = self.identity.lock().await;
        identity
            .put(
                &push.anchor,
                RemoteRef {
                    list_id: list_id.to_string(),
                    task_id: remote.task_id,
                    linked_resource_id: linked,
                    hash: push.task.semantic_hash(),
                    synced_at: remote.last_modified,
                },
            )
            .await;
        debug!(anchor = %push.anchor, "pushed local task");
        Ok(())
    }

    async fn apply_pull(
        &self,
        list_id: &str,
        pull: &PlannedPull,
        texts: &mut HashMap<PathBuf, String>,
    ) -> Result<()> {
        let patch = pull.remote.to_patch();
        let text = match texts.get(&pull.path) {
            Some(text) => text.clone(),
            None => self.read_or_empty(&pull.path).await?,
        };
        let updated = apply_patch_to_text(&text, &pull.anchor, &patch)
            .ok_or_else(|| SyncError::AnchorNotFound(pull.anchor.clone()))?;
        self.vault.write_file(&pull.path, &updated).await?;
        texts.insert(pull.path.clone(), updated);

        // The write we just made must not re-trigger a sync.
        self.throttle
            .lock()
            .await
            .cooldown
            .start(&pull.path.to_string_lossy());

        let mut identity = self.identity.lock().await;
        let prior_linked = identity
            .get(&pull.anchor)
            .and_then(|r| r.linked_resource_id.clone());
        identity
            .put(
                &pull.anchor,
                RemoteRef {
                    list_id: list_id.to_string(),
                    task_id: pull.remote.task_id.clone(),
                    linked_resource_id: prior_linked,
                    hash: patch.semantic_hash(),
                    synced_at: pull.remote.last_modified,
                },
            )
            .await;

        if pull.conflict {
            warn!(
                anchor = %pull.anchor,
                task = %pull.remote.task_id,
                "both sides changed; resolved remote-wins, local edits overwritten"
            );
        } else {
            debug!(anchor = %pull.anchor, "pulled remote task");
        }
        Ok(())
    }

    async fn apply_materialize(
        &self,
        list_id: &str,
        remote: &RemoteTask,
        texts: &mut HashMap<PathBuf, String>,
    ) -> Result<()> {
        let anchor = remote
            .linked_anchor
            .clone()
            .unwrap_or_else(generate_anchor_id);
        let path = self.config.inbox_file.clone();
        let patch = remote.to_patch();

        let text = match texts.get(&path) {
            Some(text) => text.clone(),
            None => self.read_or_empty(&path).await?,
        };
        let updated = append_task_block(&text, &anchor, &patch);
        self.vault.write_file(&path, &updated).await?;
        texts.insert(path.clone(), updated);

        self.throttle
            .lock()
            .await
            .cooldown
            .start(&path.to_string_lossy());

        let linked = if remote.linked_anchor.is_some() {
            // Back-reference already exists remotely; its id is not needed.
            None
        } else {
            match with_retry(&self.config.retry, "link resource", || {
                self.api
                    .upsert_linked_resource(list_id, &remote.task_id, &anchor)
            })
            .await
            {
                Ok(id) => Some(id),
                Err(e @ ApiError::Unauthorized(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(anchor = %anchor, "linked resource creation failed: {}", e);
                    None
                }
            }
        };

        let mut identity = self.identity.lock().await;
        identity
            .put(
                &anchor,
                RemoteRef {
                    list_id: list_id.to_string(),
                    task_id: remote.task_id.clone(),
                    linked_resource_id: linked,
                    hash: patch.semantic_hash(),
                    synced_at: remote.last_modified,
                },
            )
            .await;
        debug!(anchor = %anchor, task = %remote.task_id, "materialized remote task into vault");
        Ok(())
    }
}
