//! Scaler dispatcher — when environment scaler runs happen.
//!
//! Callers ask for a run with [`ScalerDispatcher::schedule_run`]. Each
//! environment gets one pending run at a time: a background task that waits
//! out a grace period and then runs the [`EnvironmentScaler`]. Another
//! request inside the grace period pushes the run back instead of queueing
//! a second one. [`ScalerDispatcher::start`] requests a run for every
//! environment once per interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use capgrid_provider::WorkloadRegistry;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::environment::{EnvironmentScaler, ScalerRunInfo};

/// A pending run for one environment.
struct PendingRun {
    id: u64,
    /// Each message pushes the run back by a full grace period.
    reset_tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    scaler: EnvironmentScaler,
    registry: Arc<dyn WorkloadRegistry>,
    grace_period: Duration,
    pending: Mutex<HashMap<String, PendingRun>>,
    last_runs: Mutex<HashMap<String, ScalerRunInfo>>,
    next_id: AtomicU64,
    completed: AtomicU64,
}

#[derive(Clone)]
pub struct ScalerDispatcher {
    inner: Arc<Inner>,
}

impl ScalerDispatcher {
    pub fn new(scaler: EnvironmentScaler, registry: Arc<dyn WorkloadRegistry>, grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                scaler,
                registry,
                grace_period,
                pending: Mutex::new(HashMap::new()),
                last_runs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Run the environment scaler for `environment_id` once the grace
    /// period passes without another request.
    pub async fn schedule_run(&self, environment_id: &str) {
        let mut pending = self.inner.pending.lock().await;

        if let Some(run) = pending.get(environment_id)
            && run.reset_tx.send(()).is_ok()
        {
            debug!(environment = %environment_id, "pushing back scheduled scaler run");
            return;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (reset_tx, reset_rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        let environment = environment_id.to_string();
        let handle = tokio::spawn(async move {
            inner.debounce(environment, id, reset_rx).await;
        });

        pending.insert(environment_id.to_string(), PendingRun { id, reset_tx, handle });
        debug!(
            environment = %environment_id,
            grace_ms = self.inner.grace_period.as_millis() as u64,
            "scaler run scheduled"
        );
    }

    /// Request a run for every environment. Returns how many were requested.
    pub async fn run_all(&self) -> usize {
        let environments = match self.inner.registry.list_environments().await {
            Ok(envs) => envs,
            Err(e) => {
                error!(error = %e, "scaler dispatcher could not list environments");
                return 0;
            }
        };

        debug!(environments = environments.len(), "scheduling scaler runs for all environments");
        for env in &environments {
            self.schedule_run(&env.environment_id).await;
        }
        environments.len()
    }

    /// Spawn the periodic loop. It stops when `shutdown` flips or its sender
    /// is dropped; runs already pending are cancelled.
    pub fn start(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "scaler dispatcher started");

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        dispatcher.run_all().await;
                    }
                    _ = shutdown.changed() => {
                        info!("scaler dispatcher shutting down");
                        break;
                    }
                }
            }

            dispatcher.cancel_pending().await;
        })
    }

    /// Abort every run still waiting out its grace period.
    pub async fn cancel_pending(&self) {
        let mut pending = self.inner.pending.lock().await;
        for (environment, run) in pending.drain() {
            run.handle.abort();
            debug!(%environment, "pending scaler run cancelled");
        }
    }

    /// Environments with a run waiting out its grace period.
    pub async fn pending_environments(&self) -> Vec<String> {
        self.inner.pending.lock().await.keys().cloned().collect()
    }

    /// Report of the last successful run for the environment.
    pub async fn last_run(&self, environment_id: &str) -> Option<ScalerRunInfo> {
        self.inner.last_runs.lock().await.get(environment_id).cloned()
    }

    /// Runs finished since start, failed ones included.
    pub fn completed_runs(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }
}

impl Inner {
    async fn debounce(&self, environment_id: String, id: u64, mut resets: mpsc::UnboundedReceiver<()>) {
        let sleep = tokio::time::sleep(self.grace_period);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    let mut pending = self.pending.lock().await;
                    // A request that raced the timer still gets its grace period.
                    let mut pushed_back = false;
                    while resets.try_recv().is_ok() {
                        pushed_back = true;
                    }
                    if pushed_back {
                        sleep.as_mut().reset(Instant::now() + self.grace_period);
                        continue;
                    }
                    if pending.get(&environment_id).is_some_and(|run| run.id == id) {
                        pending.remove(&environment_id);
                    }
                    break;
                }
                Some(()) = resets.recv() => {
                    sleep.as_mut().reset(Instant::now() + self.grace_period);
                }
            }
        }

        debug!(environment = %environment_id, "running environment scaler");
        match self.scaler.run(&environment_id).await {
            Ok(info) => {
                info!(
                    environment = %environment_id,
                    desired = info.desired_scale_after_run,
                    actual = info.actual_scale_after_run,
                    errors = info.errors.len(),
                    "scheduled scaler run finished"
                );
                self.last_runs.lock().await.insert(environment_id, info);
            }
            Err(e) => {
                error!(environment = %environment_id, error = %e, "scheduled scaler run failed");
            }
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use capgrid_provider::*;

    use super::*;
    use crate::testutil::*;

    const GRACE: Duration = Duration::from_secs(1);

    fn dispatcher(cloud: &MemoryCloud) -> ScalerDispatcher {
        let scaler = EnvironmentScaler::new(resource_manager(cloud), Arc::new(cloud.clone()));
        ScalerDispatcher::new(scaler, Arc::new(cloud.clone()), GRACE)
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_for_grace_period() {
        let cloud = cloud_with_env("env", 0, 5);
        let dispatcher = dispatcher(&cloud);

        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(dispatcher.completed_runs(), 0);
        assert_eq!(dispatcher.pending_environments().await, vec!["env".to_string()]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.completed_runs(), 1);
        assert!(dispatcher.last_run("env").await.is_some());
        assert!(dispatcher.pending_environments().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_inside_grace_period_coalesce() {
        let cloud = cloud_with_env("env", 0, 5);
        let dispatcher = dispatcher(&cloud);

        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        dispatcher.schedule_run("env").await;

        // The first two deadlines have passed; each new request restarted
        // the wait.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(dispatcher.completed_runs(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dispatcher.completed_runs(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(dispatcher.completed_runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_run_schedules_another() {
        let cloud = cloud_with_env("env", 0, 5);
        let dispatcher = dispatcher(&cloud);

        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(dispatcher.completed_runs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_run_scales_the_environment() {
        let cloud = cloud_with_env("env", 0, 5);
        cloud.put_task_definition(task_def("job:1", 256, 256));
        cloud.put_registry_task(waiting_task("t-1", "env", "job:1", STATUS_PENDING));
        let dispatcher = dispatcher(&cloud);

        dispatcher.schedule_run("env").await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let info = dispatcher.last_run("env").await.unwrap();
        assert_eq!(info.actual_scale_after_run, 1);
        assert_eq!(cloud.group("env").unwrap().desired_capacity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_covers_every_environment() {
        let cloud = cloud_with_env("a", 0, 5);
        cloud.add_environment("b", 0, 5, "t2.medium");
        let dispatcher = dispatcher(&cloud);
        let (tx, rx) = watch::channel(false);

        let handle = dispatcher.start(Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(dispatcher.completed_runs(), 0);

        tokio::time::sleep(Duration::from_secs(32)).await;
        assert_eq!(dispatcher.completed_runs(), 2);
        assert!(dispatcher.last_run("a").await.is_some());
        assert!(dispatcher.last_run("b").await.is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(dispatcher.completed_runs(), 4);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_runs() {
        let cloud = cloud_with_env("env", 0, 5);
        let dispatcher = dispatcher(&cloud);
        let (tx, rx) = watch::channel(false);
        let handle = dispatcher.start(Duration::from_secs(60), rx);

        dispatcher.schedule_run("env").await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(dispatcher.completed_runs(), 0);
        assert!(dispatcher.pending_environments().await.is_empty());
    }

    #[tokio::test]
    async fn run_all_with_unreachable_registry_requests_nothing() {
        let cloud = cloud_with_env("env", 0, 5);
        cloud.fail_next(Operation::ListEnvironments, ProviderError::Unavailable("down".into()));

        assert_eq!(dispatcher(&cloud).run_all().await, 0);
    }
}
