//! In-memory task service (for testing)
//!
//! Behaves like the real service from the engine's point of view: tasks get
//! ids and last-modified markers, the delta feed pages its results and hands
//! out cursors, and failures can be scripted per call. Linked resources are
//! separate records and do not touch a task's change feed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::api::TaskApi;
use crate::errors::{ApiError, Result};
use crate::model::{DeltaPage, DeltaQuery, RemoteList, RemoteTask, TaskDraft};

struct StoredTask {
    task: RemoteTask,
    rev: u64,
}

#[derive(Default)]
struct FakeState {
    lists: Vec<RemoteList>,
    tasks: BTreeMap<(String, String), StoredTask>,
    next_task_id: u64,
    revision: u64,
    page_size: usize,
    reject_cursor_once: bool,
    delta_failures: VecDeque<ApiError>,
    mutation_failures: VecDeque<ApiError>,
    unauthorized: bool,
    creates: usize,
    updates: usize,
}

/// Scriptable in-memory [`TaskApi`] implementation
pub struct FakeTaskApi {
    state: Mutex<FakeState>,
    call_delay: Mutex<Option<Duration>>,
}

impl FakeTaskApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                page_size: usize::MAX,
                ..FakeState::default()
            }),
            call_delay: Mutex::new(None),
        }
    }

    /// Fake with a single list already present
    pub fn with_list(list_id: &str) -> Self {
        let fake = Self::new();
        fake.add_list(list_id, list_id);
        fake
    }

    pub fn add_list(&self, list_id: &str, name: &str) {
        self.state.lock().unwrap().lists.push(RemoteList {
            list_id: list_id.to_string(),
            name: name.to_string(),
        });
    }

    /// Cap delta pages at `n` tasks to exercise pagination
    pub fn set_page_size(&self, n: usize) {
        self.state.lock().unwrap().page_size = n;
    }

    /// Make the next cursor-bearing delta request fail with `InvalidCursor`
    pub fn reject_next_cursor(&self) {
        self.state.lock().unwrap().reject_cursor_once = true;
    }

    /// Queue a failure for the next delta page request
    pub fn fail_next_delta(&self, err: ApiError) {
        self.state.lock().unwrap().delta_failures.push_back(err);
    }

    /// Queue a failure for the next create/update request
    pub fn fail_next_mutation(&self, err: ApiError) {
        self.state.lock().unwrap().mutation_failures.push_back(err);
    }

    /// Reject every call until cleared, as an expired session would
    pub fn set_unauthorized(&self, on: bool) {
        self.state.lock().unwrap().unauthorized = on;
    }

    /// Delay applied at the start of every call
    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = Some(delay);
    }

    /// Tombstone a task, as a service-side deletion would
    pub fn delete_task(&self, list_id: &str, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.revision += 1;
        let rev = state.revision;
        if let Some(stored) = state
            .tasks
            .get_mut(&(list_id.to_string(), task_id.to_string()))
        {
            stored.task.deleted = true;
            stored.task.last_modified = Utc::now();
            stored.rev = rev;
        }
    }

    /// Service-side edit outside the engine, bumping the change feed
    pub fn edit_task(&self, list_id: &str, task_id: &str, edit: impl FnOnce(&mut RemoteTask)) {
        let mut state = self.state.lock().unwrap();
        state.revision += 1;
        let rev = state.revision;
        if let Some(stored) = state
            .tasks
            .get_mut(&(list_id.to_string(), task_id.to_string()))
        {
            edit(&mut stored.task);
            stored.task.last_modified = Utc::now();
            stored.rev = rev;
        }
    }

    /// Inspect a task without going through the API surface
    pub fn task(&self, list_id: &str, task_id: &str) -> Option<RemoteTask> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(&(list_id.to_string(), task_id.to_string()))
            .map(|stored| stored.task.clone())
    }

    pub fn live_task_count(&self, list_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|((list, _), stored)| list == list_id && !stored.task.deleted)
            .count()
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    async fn delay(&self) {
        let delay = *self.call_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_auth(state: &FakeState) -> Result<()> {
        if state.unauthorized {
            Err(ApiError::Unauthorized("session expired".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for FakeTaskApi {
    fn default() -> Self {
        Self::new()
    }
}

fn cursor_for(rev: u64) -> String {
    format!("c{}", rev)
}

fn parse_cursor(cursor: &str) -> Result<u64> {
    cursor
        .strip_prefix('c')
        .and_then(|rest| rest.parse().ok())
        .ok_or(ApiError::InvalidCursor)
}

fn page_link(from_rev: u64, offset: usize) -> String {
    format!("p{};{}", from_rev, offset)
}

fn parse_page_link(link: &str) -> Result<(u64, usize)> {
    let rest = link
        .strip_prefix('p')
        .ok_or_else(|| ApiError::Validation(format!("bad page link: {}", link)))?;
    let (rev, offset) = rest
        .split_once(';')
        .ok_or_else(|| ApiError::Validation(format!("bad page link: {}", link)))?;
    match (rev.parse(), offset.parse()) {
        (Ok(rev), Ok(offset)) => Ok((rev, offset)),
        _ => Err(ApiError::Validation(format!("bad page link: {}", link))),
    }
}

#[async_trait]
impl TaskApi for FakeTaskApi {
    async fn list_lists(&self) -> Result<Vec<RemoteList>> {
        self.delay().await;
        let state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        Ok(state.lists.clone())
    }

    async fn list_tasks(&self, list_id: &str) -> Result<Vec<RemoteTask>> {
        self.delay().await;
        let state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        Ok(state
            .tasks
            .iter()
            .filter(|((list, _), stored)| list == list_id && !stored.task.deleted)
            .map(|(_, stored)| stored.task.clone())
            .collect())
    }

    async fn get_task(&self, list_id: &str, task_id: &str) -> Result<RemoteTask> {
        self.delay().await;
        let state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        state
            .tasks
            .get(&(list_id.to_string(), task_id.to_string()))
            .filter(|stored| !stored.task.deleted)
            .map(|stored| stored.task.clone())
            .ok_or_else(|| ApiError::NotFound(format!("{}/{}", list_id, task_id)))
    }

    async fn create_task(&self, list_id: &str, draft: &TaskDraft) -> Result<RemoteTask> {
        self.delay().await;
        let mut state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        if let Some(err) = state.mutation_failures.pop_front() {
            return Err(err);
        }
        if draft.title.trim().is_empty() {
            return Err(ApiError::Validation("title must not be empty".to_string()));
        }

        state.next_task_id += 1;
        state.revision += 1;
        let task = RemoteTask {
            list_id: list_id.to_string(),
            task_id: format!("T{}", state.next_task_id),
            title: draft.title.clone(),
            completed: draft.completed,
            priority: draft.priority,
            due_date: draft.due_date,
            checklist: draft.checklist.clone(),
            last_modified: Utc::now(),
            linked_anchor: None,
            deleted: false,
        };
        let rev = state.revision;
        state.tasks.insert(
            (list_id.to_string(), task.task_id.clone()),
            StoredTask {
                task: task.clone(),
                rev,
            },
        );
        state.creates += 1;
        Ok(task)
    }

    async fn update_task(
        &self,
        list_id: &str,
        task_id: &str,
        draft: &TaskDraft,
    ) -> Result<RemoteTask> {
        self.delay().await;
        let mut state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        if let Some(err) = state.mutation_failures.pop_front() {
            return Err(err);
        }

        state.revision += 1;
        let rev = state.revision;
        let stored = state
            .tasks
            .get_mut(&(list_id.to_string(), task_id.to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("{}/{}", list_id, task_id)))?;
        stored.task.title = draft.title.clone();
        stored.task.completed = draft.completed;
        stored.task.priority = draft.priority;
        stored.task.due_date = draft.due_date;
        stored.task.checklist = draft.checklist.clone();
        stored.task.last_modified = Utc::now();
        stored.rev = rev;
        let task = stored.task.clone();
        state.updates += 1;
        Ok(task)
    }

    async fn upsert_linked_resource(
        &self,
        list_id: &str,
        task_id: &str,
        anchor_id: &str,
    ) -> Result<String> {
        self.delay().await;
        let mut state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        let stored = state
            .tasks
            .get_mut(&(list_id.to_string(), task_id.to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("{}/{}", list_id, task_id)))?;
        stored.task.linked_anchor = Some(anchor_id.to_string());
        Ok(format!("lr-{}", anchor_id))
    }

    async fn fetch_delta_page(&self, list_id: &str, query: &DeltaQuery) -> Result<DeltaPage> {
        self.delay().await;
        let mut state = self.state.lock().unwrap();
        Self::check_auth(&state)?;
        if let Some(err) = state.delta_failures.pop_front() {
            return Err(err);
        }

        let (from_rev, offset) = match query {
            DeltaQuery::Initial => (0, 0),
            DeltaQuery::Cursor(cursor) => {
                if state.reject_cursor_once {
                    state.reject_cursor_once = false;
                    return Err(ApiError::InvalidCursor);
                }
                (parse_cursor(cursor)?, 0)
            }
            DeltaQuery::Page(link) => parse_page_link(link)?,
        };

        // Full enumerations list live tasks; incremental feeds carry
        // tombstones so deletions are observable.
        let matching: Vec<RemoteTask> = state
            .tasks
            .iter()
            .filter(|((list, _), stored)| {
                list == list_id
                    && stored.rev > from_rev
                    && (from_rev > 0 || !stored.task.deleted)
            })
            .map(|(_, stored)| stored.task.clone())
            .collect();

        let end = offset.saturating_add(state.page_size).min(matching.len());
        let page_tasks = matching
            .get(offset..end)
            .map(|slice| slice.to_vec())
            .unwrap_or_default();

        if end < matching.len() {
            Ok(DeltaPage {
                tasks: page_tasks,
                next_link: Some(page_link(from_rev, end)),
                delta_link: None,
            })
        } else {
            Ok(DeltaPage {
                tasks: page_tasks,
                next_link: None,
                delta_link: Some(cursor_for(state.revision)),
            })
        }
    }
}
