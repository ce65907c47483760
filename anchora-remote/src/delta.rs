//! Incremental fetching of remote task state
//!
//! Follows pagination links until the feed is exhausted so callers always
//! see one coherent snapshot. A rejected cursor transparently restarts the
//! fetch as a full enumeration instead of surfacing the error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::TaskApi;
use crate::errors::{ApiError, Result};
use crate::model::{DeltaQuery, DeltaSnapshot, RemoteTask};
use crate::retry::{with_retry, RetryPolicy};

pub struct DeltaFetcher {
    api: Arc<dyn TaskApi>,
    policy: RetryPolicy,
}

impl DeltaFetcher {
    pub fn new(api: Arc<dyn TaskApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// Fetch remote task state for one list.
    ///
    /// With a cursor, returns changes since the cursor was issued; without
    /// one, performs a full enumeration. Either way all pages are followed
    /// and accumulated before returning.
    pub async fn fetch(&self, list_id: &str, cursor: Option<&str>) -> Result<DeltaSnapshot> {
        match cursor {
            None => self.fetch_from(list_id, DeltaQuery::Initial, true).await,
            Some(cursor) => {
                match self
                    .fetch_from(list_id, DeltaQuery::Cursor(cursor.to_string()), false)
                    .await
                {
                    Err(ApiError::InvalidCursor) => {
                        warn!(list = list_id, "delta cursor rejected, falling back to full fetch");
                        self.fetch_from(list_id, DeltaQuery::Initial, true).await
                    }
                    other => other,
                }
            }
        }
    }

    async fn fetch_from(
        &self,
        list_id: &str,
        first: DeltaQuery,
        full: bool,
    ) -> Result<DeltaSnapshot> {
        let mut tasks: Vec<RemoteTask> = Vec::new();
        let mut query = first;
        let mut pages = 0usize;
        loop {
            let page = with_retry(&self.policy, "delta page", || {
                self.api.fetch_delta_page(list_id, &query)
            })
            .await?;
            pages += 1;
            tasks.extend(page.tasks);

            match page.next_link {
                Some(next) => query = DeltaQuery::Page(next),
                None => {
                    debug!(
                        list = list_id,
                        pages,
                        tasks = tasks.len(),
                        full,
                        "delta fetch complete"
                    );
                    return Ok(DeltaSnapshot {
                        tasks,
                        new_cursor: page.delta_link,
                        full,
                    });
                }
            }
        }
    }
}
