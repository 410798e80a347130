//! Task scheduler — keeps trying one-off copies the cluster had no room for.
//!
//! The orchestration service forgets a task it could not place. The
//! scheduler holds each such copy as a placeholder record and runs a
//! background loop per copy that retries placement once per retry
//! interval until it lands, fails for a reason other than capacity, is
//! deleted, or expires.
//!
//! Each copy's cancellation handle lives in the registry. Whoever removes
//! the copy takes the handle and consumes it, so a copy is cancelled at
//! most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use capgrid_core::Settings;
use capgrid_provider::{
    CLUSTER_CAPACITY_REASON, ContainerOverride, OrchestrationApi, STATUS_PENDING, STATUS_RUNNING, Task,
    TaskCopy, WorkloadTask, cluster_arn, task_definition_arn,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything needed to run one copy.
#[derive(Debug, Clone)]
struct CopyRequest {
    task_id: String,
    task_definition: String,
    environment_id: String,
    overrides: Vec<ContainerOverride>,
}

/// Sends the stop signal to a copy's retry loop. Consumed on use.
struct CopyCancel {
    tx: watch::Sender<bool>,
}

impl CopyCancel {
    fn cancel(self) {
        let _ = self.tx.send(true);
    }
}

struct ScheduledCopy {
    copy_id: u64,
    created_at: Instant,
    request: CopyRequest,
    placeholder: Task,
    cancel: CopyCancel,
}

struct SweepSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

enum Attempt {
    Placed,
    Retry,
    Failed(String),
}

struct Inner {
    orchestration: Arc<dyn OrchestrationApi>,
    /// task id → copies still waiting.
    copies: Mutex<HashMap<String, Vec<ScheduledCopy>>>,
    next_copy_id: AtomicU64,
    retry_interval: Duration,
    task_timeout: Duration,
    cleanup_interval: Duration,
    sweep: std::sync::Mutex<Option<SweepSlot>>,
}

#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    /// A scheduler with no expiry sweep. Copies only expire after
    /// [`start_cleanup`](Self::start_cleanup) runs; use [`spawn`](Self::spawn)
    /// to get both at once.
    pub fn new(orchestration: Arc<dyn OrchestrationApi>, settings: &Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestration,
                copies: Mutex::new(HashMap::new()),
                next_copy_id: AtomicU64::new(1),
                retry_interval: settings.retry_interval,
                task_timeout: settings.task_timeout,
                cleanup_interval: settings.cleanup_interval,
                sweep: std::sync::Mutex::new(None),
            }),
        }
    }

    /// A scheduler with its expiry sweep already running. Needs a tokio
    /// runtime.
    pub fn spawn(orchestration: Arc<dyn OrchestrationApi>, settings: &Settings) -> Self {
        let scheduler = Self::new(orchestration, settings);
        scheduler.start_cleanup();
        scheduler
    }

    /// Queue `count` copies of a task and start retrying each one.
    pub async fn add_task(
        &self,
        task_id: &str,
        task_definition: &str,
        environment_id: &str,
        count: usize,
        overrides: Vec<ContainerOverride>,
    ) {
        let request = CopyRequest {
            task_id: task_id.to_string(),
            task_definition: task_definition.to_string(),
            environment_id: environment_id.to_string(),
            overrides,
        };

        let mut copies = self.inner.copies.lock().await;
        let entry = copies.entry(task_id.to_string()).or_default();

        for _ in 0..count {
            let copy_id = self.inner.next_copy_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = watch::channel(false);

            entry.push(ScheduledCopy {
                copy_id,
                created_at: Instant::now(),
                request: request.clone(),
                placeholder: pending_placeholder(task_id, task_definition, environment_id, copy_id),
                cancel: CopyCancel { tx },
            });

            tokio::spawn(retry_until_placed(self.inner.clone(), copy_id, request.clone(), rx));
        }

        info!(%task_id, %environment_id, count, "task copies scheduled");
    }

    /// Placeholders for every waiting copy of a task.
    pub async fn get_task(&self, task_id: &str) -> Vec<Task> {
        let copies = self.inner.copies.lock().await;
        copies
            .get(task_id)
            .map(|list| list.iter().map(|c| c.placeholder.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let copies = self.inner.copies.lock().await;
        copies
            .values()
            .flatten()
            .map(|c| c.placeholder.clone())
            .collect()
    }

    /// Waiting copies grouped per task, in the registry's shape.
    pub async fn workloads(&self) -> Vec<WorkloadTask> {
        let copies = self.inner.copies.lock().await;
        copies
            .iter()
            .filter_map(|(task_id, list)| {
                let first = list.first()?;
                Some(WorkloadTask {
                    task_id: task_id.clone(),
                    environment_id: first.request.environment_id.clone(),
                    task_definition: first.request.task_definition.clone(),
                    copies: list
                        .iter()
                        .map(|c| TaskCopy {
                            copy_id: c.copy_id.to_string(),
                            reason: c.placeholder.stopped_reason.clone().unwrap_or_default(),
                            details: Vec::new(),
                        })
                        .collect(),
                })
            })
            .collect()
    }

    /// Cancel and forget every copy of a task. Returns how many there were.
    pub async fn delete_task(&self, task_id: &str) -> usize {
        let removed = self.inner.copies.lock().await.remove(task_id).unwrap_or_default();
        let count = removed.len();
        for copy in removed {
            copy.cancel.cancel();
        }
        if count > 0 {
            info!(%task_id, count, "task copies deleted");
        }
        count
    }

    /// Remove copies older than the task timeout. Returns how many went.
    pub async fn cleanup(&self) -> usize {
        self.inner.cleanup().await
    }

    /// Start the periodic cleanup sweep. Calling it again is a no-op.
    pub fn start_cleanup(&self) {
        let mut sweep = self.inner.sweep.lock().unwrap_or_else(|e| e.into_inner());
        if sweep.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                inner.cleanup().await;
                tokio::select! {
                    _ = tokio::time::sleep(inner.cleanup_interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("scheduled task cleanup stopped");
        });

        *sweep = Some(SweepSlot { handle, shutdown_tx });
    }

    /// Stop the sweep and cancel every waiting copy.
    pub async fn shutdown(&self) {
        let slot = self.inner.sweep.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
        }

        let drained: Vec<ScheduledCopy> = self
            .inner
            .copies
            .lock()
            .await
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        let count = drained.len();
        for copy in drained {
            copy.cancel.cancel();
        }
        info!(cancelled = count, "task scheduler stopped");
    }
}

impl Inner {
    async fn cleanup(&self) -> usize {
        let mut expired = Vec::new();
        {
            let mut copies = self.copies.lock().await;
            for list in copies.values_mut() {
                let (old, keep): (Vec<_>, Vec<_>) = list
                    .drain(..)
                    .partition(|c| c.created_at.elapsed() > self.task_timeout);
                *list = keep;
                expired.extend(old);
            }
            copies.retain(|_, list| !list.is_empty());
        }

        let count = expired.len();
        for copy in expired {
            info!(task_id = %copy.request.task_id, copy_id = copy.copy_id, "removing expired task copy");
            copy.cancel.cancel();
        }
        count
    }

    async fn attempt(&self, request: &CopyRequest, copy_id: u64) -> Attempt {
        debug!(task_id = %request.task_id, copy_id, "attempting to start task copy");

        let result = self
            .orchestration
            .run_task(
                &request.environment_id,
                &request.task_definition,
                1,
                &request.task_id,
                &request.overrides,
            )
            .await;

        match result {
            Ok(output) if output.failures.is_empty() => Attempt::Placed,
            Ok(output) => {
                info!(
                    task_id = %request.task_id,
                    copy_id,
                    failures = output.failures.len(),
                    reason = %output.failures[0].reason,
                    "task copy not placed, waiting for capacity"
                );
                Attempt::Retry
            }
            Err(e) if e.is_insufficient_capacity() => {
                info!(task_id = %request.task_id, copy_id, "waiting for cluster capacity");
                Attempt::Retry
            }
            Err(e) => {
                warn!(task_id = %request.task_id, copy_id, error = %e, "task copy failed to start");
                Attempt::Failed(e.to_string())
            }
        }
    }

    /// Drop a placed copy from the registry and signal its loop.
    async fn finish_copy(&self, task_id: &str, copy_id: u64) {
        let removed = {
            let mut copies = self.copies.lock().await;
            let Some(list) = copies.get_mut(task_id) else {
                return;
            };
            let removed = list
                .iter()
                .position(|c| c.copy_id == copy_id)
                .map(|idx| list.remove(idx));
            if list.is_empty() {
                copies.remove(task_id);
            }
            removed
        };

        if let Some(copy) = removed {
            info!(%task_id, copy_id, "task copy started, no longer scheduled");
            copy.cancel.cancel();
        }
    }

    async fn mark_failed(&self, request: &CopyRequest, copy_id: u64, reason: String) {
        let mut copies = self.copies.lock().await;
        if let Some(copy) = copies
            .get_mut(&request.task_id)
            .and_then(|list| list.iter_mut().find(|c| c.copy_id == copy_id))
        {
            copy.placeholder = failed_placeholder(
                &request.task_id,
                &request.task_definition,
                &request.environment_id,
                copy_id,
                reason,
            );
        }
    }
}

async fn retry_until_placed(
    inner: Arc<Inner>,
    copy_id: u64,
    request: CopyRequest,
    mut cancelled: watch::Receiver<bool>,
) {
    loop {
        if *cancelled.borrow() {
            return;
        }

        match inner.attempt(&request, copy_id).await {
            Attempt::Placed => {
                inner.finish_copy(&request.task_id, copy_id).await;
                return;
            }
            Attempt::Retry => {}
            Attempt::Failed(reason) => {
                inner.mark_failed(&request, copy_id, reason).await;
                // Keep the failure visible until someone removes it.
                let _ = cancelled.wait_for(|stop| *stop).await;
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.retry_interval) => {}
            _ = cancelled.changed() => {
                debug!(task_id = %request.task_id, copy_id, "task copy cancelled");
                return;
            }
        }
    }
}

/// Placeholder for a copy waiting on capacity.
pub fn pending_placeholder(task_id: &str, task_definition: &str, environment_id: &str, copy_id: u64) -> Task {
    Task {
        task_arn: format!("arn:task/scheduled/{task_id}/{copy_id}"),
        cluster_arn: cluster_arn(environment_id),
        task_definition_arn: task_definition_arn(task_definition),
        started_by: task_id.to_string(),
        last_status: STATUS_PENDING.to_string(),
        desired_status: STATUS_RUNNING.to_string(),
        stopped_reason: Some(CLUSTER_CAPACITY_REASON.to_string()),
        containers: Vec::new(),
    }
}

/// Placeholder for a copy that failed for a reason other than capacity.
pub fn failed_placeholder(
    task_id: &str,
    task_definition: &str,
    environment_id: &str,
    copy_id: u64,
    reason: String,
) -> Task {
    Task {
        stopped_reason: Some(reason),
        ..pending_placeholder(task_id, task_definition, environment_id, copy_id)
    }
}
