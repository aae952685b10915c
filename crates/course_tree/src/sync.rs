use std::{future::Future, time::Duration};

use shared::{domain::CourseId, protocol::PositionUpdate};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    plan::SyncPlan,
    store::{CourseStore, StoreError},
};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included. Zero behaves as one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// One atomic `apply_positions` request.
    Batched { retry: RetryPolicy },
    /// One request per update, strictly in plan order. A failure part-way
    /// leaves the earlier updates applied.
    Sequential { retry: RetryPolicy },
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::Batched {
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Position updates the store acknowledged.
    pub applied: usize,
    /// Store calls issued, retries included.
    pub requests: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("batched position update failed, nothing was applied: {source}")]
    Batch {
        #[source]
        source: StoreError,
    },
    #[error(
        "position sync stopped after {applied} of {total} updates, the store now holds a partially applied order: {source}"
    )]
    Partial {
        applied: usize,
        total: usize,
        failed: PositionUpdate,
        #[source]
        source: StoreError,
    },
}

impl SyncError {
    /// Updates that reached the store before the failure.
    pub fn applied(&self) -> usize {
        match self {
            SyncError::Batch { .. } => 0,
            SyncError::Partial { applied, .. } => *applied,
        }
    }

    /// True when the store may be holding a mix of old and new positions.
    pub fn left_store_diverged(&self) -> bool {
        self.applied() > 0
    }

    pub fn store_error(&self) -> &StoreError {
        match self {
            SyncError::Batch { source } | SyncError::Partial { source, .. } => source,
        }
    }

    pub fn into_store_error(self) -> StoreError {
        match self {
            SyncError::Batch { source } | SyncError::Partial { source, .. } => source,
        }
    }
}

/// Pushes `plan` to `store`. Requests are never issued concurrently.
pub async fn sync_plan<S>(
    store: &S,
    course_id: CourseId,
    plan: &SyncPlan,
    strategy: SyncStrategy,
) -> Result<SyncReport, SyncError>
where
    S: CourseStore + ?Sized,
{
    if plan.is_empty() {
        debug!(course_id = course_id.0, "nothing to sync");
        return Ok(SyncReport::default());
    }

    match strategy {
        SyncStrategy::Batched { retry } => {
            let (result, attempts) =
                with_retry(retry, || store.apply_positions(course_id, plan.updates())).await;
            match result {
                Ok(()) => {
                    info!(
                        course_id = course_id.0,
                        updates = plan.len(),
                        attempts,
                        "course structure saved"
                    );
                    Ok(SyncReport {
                        applied: plan.len(),
                        requests: attempts as usize,
                    })
                }
                Err(source) => {
                    error!(course_id = course_id.0, %source, "batched position update failed");
                    Err(SyncError::Batch { source })
                }
            }
        }
        SyncStrategy::Sequential { retry } => {
            let mut requests = 0usize;
            for (index, update) in plan.updates().iter().enumerate() {
                let (result, attempts) = with_retry(retry, || apply_one(store, update)).await;
                requests += attempts as usize;
                if let Err(source) = result {
                    error!(
                        course_id = course_id.0,
                        applied = index,
                        total = plan.len(),
                        ?update,
                        %source,
                        "position sync stopped part-way"
                    );
                    return Err(SyncError::Partial {
                        applied: index,
                        total: plan.len(),
                        failed: *update,
                        source,
                    });
                }
            }
            info!(
                course_id = course_id.0,
                updates = plan.len(),
                requests,
                "course structure saved"
            );
            Ok(SyncReport {
                applied: plan.len(),
                requests,
            })
        }
    }
}

async fn apply_one<S>(store: &S, update: &PositionUpdate) -> Result<(), StoreError>
where
    S: CourseStore + ?Sized,
{
    match *update {
        PositionUpdate::Chapter {
            chapter_id,
            position,
        } => store.update_chapter_position(chapter_id, position).await,
        PositionUpdate::Lesson {
            lesson_id,
            chapter_id,
            position,
        } => {
            store
                .update_lesson_position(lesson_id, position, chapter_id)
                .await
        }
    }
}

async fn with_retry<F, Fut>(policy: RetryPolicy, mut op: F) -> (Result<(), StoreError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(()) => return (Ok(()), attempt),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %err, "store request failed, retrying");
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(err) => return (Err(err), attempt),
        }
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
