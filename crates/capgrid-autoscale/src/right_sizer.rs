//! Right sizer — the periodic sweep that gives capacity back.
//!
//! Once per interval, for every environment: run the cluster scaler with no
//! new demand, and only if it added nothing and no work is unsettled,
//! remove nodes whose agent is gone or that run nothing. A group already at
//! its minimum keeps its idle nodes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use capgrid_core::Clock;
use capgrid_provider::{ProviderError, WorkloadRegistry};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ScaleError, ScaleResult};
use crate::scaler::ClusterScaler;

/// What one sweep did to one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSweep {
    pub environment_id: String,
    pub nodes_added: u32,
    /// Instance ids terminated this sweep.
    pub terminated: Vec<String>,
    /// Idle instance ids kept because the group is at its minimum.
    pub kept_at_minimum: Vec<String>,
    pub error: Option<String>,
}

pub struct RightSizer {
    scaler: ClusterScaler,
    registry: Arc<dyn WorkloadRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    last_cycle_start: Mutex<Option<SystemTime>>,
}

impl RightSizer {
    pub fn new(
        scaler: ClusterScaler,
        registry: Arc<dyn WorkloadRegistry>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            scaler,
            registry,
            clock,
            interval,
            last_cycle_start: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the sweep loop. It stops when `shutdown` flips or its sender
    /// is dropped.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "right sizer started");

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = self.clock.sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("right sizer shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep over every environment. Per-environment failures are
    /// logged and recorded in the report; the sweep carries on.
    pub async fn run_cycle(&self) -> Vec<EnvironmentSweep> {
        self.set_last_cycle_start(self.clock.now());

        let environments = match self.registry.list_environments().await {
            Ok(envs) => envs,
            Err(e) => {
                error!(error = %e, "right sizer could not list environments");
                return Vec::new();
            }
        };

        let mut report = Vec::with_capacity(environments.len());
        for env in environments {
            let sweep = match self.optimize_environment(&env.environment_id).await {
                Ok(sweep) => sweep,
                Err(e) => {
                    error!(environment = %env.environment_id, error = %e, "right sizing failed");
                    EnvironmentSweep {
                        environment_id: env.environment_id.clone(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            report.push(sweep);
        }

        debug!(environments = report.len(), "right sizer cycle finished");
        report
    }

    pub async fn optimize_environment(&self, environment_id: &str) -> ScaleResult<EnvironmentSweep> {
        let mut sweep = EnvironmentSweep {
            environment_id: environment_id.to_string(),
            ..Default::default()
        };

        let outcome = self
            .scaler
            .trigger_scaling_algorithm(environment_id, None, 0)
            .await?;
        sweep.nodes_added = outcome.nodes_added;

        if outcome.nodes_added > 0 || outcome.has_unallocated_work() {
            debug!(
                environment = %environment_id,
                nodes_added = outcome.nodes_added,
                unplaceable = outcome.unplaceable_work,
                pending = outcome.pending_work,
                "environment is settling, skipping scale down"
            );
            return Ok(sweep);
        }

        for instance in self.scaler.resources().describe_nodes(environment_id).await? {
            let node = instance.ec2_instance_id.as_str();

            if !instance.agent_connected {
                warn!(environment = %environment_id, %node, "agent disconnected, replacing node");
                if self.terminate(node, false).await? {
                    sweep.terminated.push(node.to_string());
                }
                continue;
            }

            if instance.running_tasks_count > 0 || instance.pending_tasks_count > 0 {
                continue;
            }

            let group = self
                .scaler
                .resources()
                .fleet()
                .describe_auto_scaling_group(environment_id)
                .await?;
            if group.desired_capacity <= group.min_size {
                warn!(
                    environment = %environment_id,
                    %node,
                    min = group.min_size,
                    "idle node kept, group is at minimum capacity"
                );
                sweep.kept_at_minimum.push(node.to_string());
                continue;
            }

            info!(environment = %environment_id, %node, "terminating idle node");
            if self.terminate(node, true).await? {
                sweep.terminated.push(node.to_string());
            }
        }

        Ok(sweep)
    }

    /// Liveness: the last sweep must have started within two intervals.
    pub fn health(&self) -> ScaleResult<String> {
        let last = self.last_cycle_start().ok_or(ScaleError::NeverRan)?;
        let elapsed = self.clock.since(last);
        let limit = self.interval * 2;

        if elapsed > limit {
            return Err(ScaleError::Stale {
                elapsed_secs: elapsed.as_secs(),
                limit_secs: limit.as_secs(),
            });
        }
        Ok(format!("right sizer last ran {}s ago", elapsed.as_secs()))
    }

    pub fn last_cycle_start(&self) -> Option<SystemTime> {
        *self.last_cycle_start.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_cycle_start(&self, at: SystemTime) {
        *self.last_cycle_start.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Returns false when the node was already gone.
    async fn terminate(&self, node: &str, decrement: bool) -> Result<bool, ProviderError> {
        match self
            .scaler
            .resources()
            .fleet()
            .terminate_instance_in_auto_scaling_group(node, decrement)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_idempotent_done() => {
                debug!(%node, "node already terminated");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use capgrid_core::ManualClock;
    use capgrid_provider::*;

    use super::*;
    use crate::testutil::*;

    fn right_sizer(cloud: &MemoryCloud, clock: Arc<ManualClock>) -> RightSizer {
        RightSizer::new(
            scaler(cloud),
            Arc::new(cloud.clone()),
            clock,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn idle_node_at_minimum_is_kept() {
        let cloud = cloud_with_env("env", 1, 5);
        cloud.put_container_instance("env", ContainerInstance::new("i-1"));
        cloud.set_desired_capacity("env", 1).await.unwrap();
        let calls_before = cloud.fleet_calls().len();

        let sweep = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .optimize_environment("env")
            .await
            .unwrap();

        assert!(sweep.terminated.is_empty());
        assert_eq!(sweep.kept_at_minimum, vec!["i-1".to_string()]);
        assert_eq!(cloud.fleet_calls().len(), calls_before);
        assert_eq!(cloud.container_instances("env").len(), 1);
    }

    #[tokio::test]
    async fn idle_node_above_minimum_is_terminated_with_decrement() {
        let cloud = cloud_with_env("env", 1, 5);
        cloud.put_container_instance("env", ContainerInstance::new("i-busy").with_tasks(1, 0));
        cloud.put_container_instance("env", ContainerInstance::new("i-idle"));
        cloud.set_desired_capacity("env", 2).await.unwrap();

        let sweep = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .optimize_environment("env")
            .await
            .unwrap();

        assert_eq!(sweep.terminated, vec!["i-idle".to_string()]);
        assert!(cloud.fleet_calls().contains(&FleetCall::Terminate {
            instance_id: "i-idle".into(),
            decrement: true,
        }));
        assert_eq!(cloud.group("env").unwrap().desired_capacity, 1);
    }

    #[tokio::test]
    async fn disconnected_node_is_replaced() {
        let cloud = cloud_with_env("env", 1, 5);
        cloud.put_container_instance("env", ContainerInstance::new("i-lost").disconnected().with_tasks(3, 0));
        cloud.set_desired_capacity("env", 1).await.unwrap();

        let sweep = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .optimize_environment("env")
            .await
            .unwrap();

        assert_eq!(sweep.terminated, vec!["i-lost".to_string()]);
        assert_eq!(
            cloud.fleet_calls().last(),
            Some(&FleetCall::Terminate { instance_id: "i-lost".into(), decrement: false })
        );
        assert_eq!(cloud.group("env").unwrap().desired_capacity, 1);
    }

    #[tokio::test]
    async fn unsettled_environment_is_left_alone() {
        let cloud = cloud_with_env("env", 0, 5);
        cloud.put_container_instance("env", ContainerInstance::new("i-idle").with_remaining(4096, 4096));
        cloud.set_desired_capacity("env", 1).await.unwrap();
        cloud.put_task_definition(task_def("job:1", 1, 1));
        cloud.put_registry_task(waiting_task("t-1", "env", "job:1", STATUS_PENDING));

        let sweep = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .optimize_environment("env")
            .await
            .unwrap();

        assert!(sweep.terminated.is_empty());
        assert_eq!(cloud.container_instances("env").len(), 1);
    }

    #[tokio::test]
    async fn undescribable_environment_is_reported() {
        let cloud = cloud_with_env("env", 0, 5);
        cloud.put_vanished_instance("env", "arn:container-instance/i-gone");

        let report = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .run_cycle()
            .await;

        assert_eq!(report.len(), 1);
        let error = report[0].error.as_deref().unwrap_or_default();
        assert!(error.contains("could not describe any container instance"), "{error}");
        assert!(report[0].terminated.is_empty());
    }

    #[tokio::test]
    async fn cycle_continues_past_failing_environment() {
        let cloud = cloud_with_env("broken", 0, 5);
        cloud.add_environment("ok", 0, 5, "t2.medium");
        cloud.fail_next(Operation::ListContainerInstances, ProviderError::Unavailable("x".into()));

        let report = right_sizer(&cloud, Arc::new(ManualClock::at_fixed_start()))
            .run_cycle()
            .await;

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].environment_id, "broken");
        assert!(report[0].error.is_some());
        assert!(report[1].error.is_none());
    }

    #[tokio::test]
    async fn health_tracks_cycle_age() {
        let cloud = cloud_with_env("env", 0, 5);
        let clock = Arc::new(ManualClock::at_fixed_start());
        let sizer = right_sizer(&cloud, clock.clone());

        assert!(matches!(sizer.health(), Err(ScaleError::NeverRan)));

        sizer.run_cycle().await;
        clock.advance(Duration::from_secs(2 * 3600));
        assert!(sizer.health().is_ok());

        clock.advance(Duration::from_secs(1));
        assert!(matches!(sizer.health(), Err(ScaleError::Stale { limit_secs: 7200, .. })));
    }

    #[tokio::test]
    async fn loop_sleeps_interval_and_stops_on_shutdown() {
        let cloud = cloud_with_env("env", 0, 5);
        let clock = Arc::new(ManualClock::at_fixed_start());
        let sizer = Arc::new(right_sizer(&cloud, clock.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = sizer.clone().start(rx);
        while clock.sleeps().len() < 3 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(3600)));
        assert!(sizer.health().is_ok());
    }
}
