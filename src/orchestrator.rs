use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::FetchError;
use crate::section::{SectionMap, SectionPayload, SectionResult, SectionShape};

pub const DEFAULT_MAX_WORKERS: usize = 10;

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<SectionPayload, FetchError>> + Send>>;

type FetchOperation = Box<dyn FnOnce() -> FetchFuture + Send>;

/// A named, zero-argument source fetch. The operation is only called when the
/// task is actually scheduled.
pub struct FetchTask {
    name: String,
    shape: SectionShape,
    fallback: Option<SectionPayload>,
    operation: FetchOperation,
}

impl FetchTask {
    pub fn new<F, Fut>(name: impl Into<String>, shape: SectionShape, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<SectionPayload, FetchError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            shape,
            fallback: None,
            operation: Box::new(move || Box::pin(operation())),
        }
    }

    /// Replace the empty default used when this task fails or is skipped.
    /// A fallback whose shape differs from the declared one is ignored.
    pub fn with_fallback(mut self, fallback: SectionPayload) -> Self {
        if fallback.shape() == self.shape {
            self.fallback = Some(fallback);
        } else {
            warn!("Ignoring fallback for '{}': shape does not match", self.name);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> SectionShape {
        self.shape
    }

    pub fn fallback(&self) -> SectionPayload {
        self.fallback
            .clone()
            .unwrap_or_else(|| SectionPayload::empty(self.shape))
    }
}

impl std::fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Runs fetch tasks on a bounded pool and collects one result per task name.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    max_workers: usize,
    deadline: Option<Duration>,
}

impl Default for FetchOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl FetchOrchestrator {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            deadline: None,
        }
    }

    /// Stop waiting after `deadline`; tasks still running are recorded as failed.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn pool_width(&self, task_count: usize) -> usize {
        self.max_workers.min(task_count).max(1)
    }

    pub async fn run(
        &self,
        tasks: Vec<FetchTask>,
        skip: &HashSet<String>,
        cancel: CancellationToken,
    ) -> SectionMap {
        let mut results = SectionMap::new();
        // name -> fallback for every task that has been scheduled but not yet merged
        let mut pending: HashMap<String, SectionPayload> = HashMap::new();
        let mut runnable = Vec::new();

        for task in tasks {
            if results.contains_key(&task.name) || pending.contains_key(&task.name) {
                warn!("Duplicate fetch task '{}' dropped", task.name);
                continue;
            }
            if skip.contains(&task.name) {
                info!("Skipping section '{}'", task.name);
                let fallback = task.fallback();
                results.insert(task.name.clone(), SectionResult::skipped(task.name, fallback));
                continue;
            }
            pending.insert(task.name.clone(), task.fallback());
            runnable.push(task);
        }

        if runnable.is_empty() {
            return results;
        }

        let width = self.pool_width(runnable.len());
        info!("Fetching {} sections with {} workers", runnable.len(), width);

        let permits = Arc::new(Semaphore::new(width));
        let mut set = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();
        for task in runnable {
            let permits = permits.clone();
            let name = task.name.clone();
            let handle = set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = (task.operation)().await;
                (task.name, task.shape, outcome)
            });
            names.insert(handle.id(), name);
        }

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Fetch cancelled with {} sections outstanding", pending.len());
                    interrupted = true;
                    break;
                }
                _ = &mut deadline => {
                    warn!("Fetch deadline reached with {} sections outstanding", pending.len());
                    interrupted = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((name, shape, outcome))) => {
                        let Some(fallback) = pending.remove(&name) else {
                            continue;
                        };
                        let result = merge_outcome(name, shape, fallback, outcome);
                        results.insert(result.name.clone(), result);
                    }
                    Some(Err(e)) => {
                        let Some(name) = names.get(&e.id()) else {
                            error!("Unknown fetch task did not complete: {}", e);
                            continue;
                        };
                        let Some(fallback) = pending.remove(name) else {
                            continue;
                        };
                        let reason = if e.is_panic() {
                            FetchError::Panicked
                        } else {
                            FetchError::Cancelled
                        };
                        error!("Section '{}' failed: {} ({})", name, reason, e);
                        results.insert(name.clone(), SectionResult::failed(name.clone(), fallback, reason));
                    }
                },
            }
        }

        set.abort_all();

        for (name, fallback) in pending {
            let reason = if interrupted {
                FetchError::Cancelled
            } else {
                FetchError::Panicked
            };
            error!("Section '{}' failed: {}", name, reason);
            results.insert(name.clone(), SectionResult::failed(name, fallback, reason));
        }

        results
    }
}

fn merge_outcome(
    name: String,
    shape: SectionShape,
    fallback: SectionPayload,
    outcome: Result<SectionPayload, FetchError>,
) -> SectionResult {
    match outcome {
        Ok(payload) if payload.shape() == shape => {
            info!("Section '{}' ok ({} entries)", name, payload.len());
            SectionResult::ok(name, payload)
        }
        Ok(_) => {
            let e = FetchError::Source(format!("returned a payload that is not {:?}-shaped", shape));
            error!("Section '{}' failed: {}", name, e);
            SectionResult::failed(name, fallback, e)
        }
        Err(e) => {
            error!("Section '{}' failed: {}", name, e);
            SectionResult::failed(name, fallback, e)
        }
    }
}
