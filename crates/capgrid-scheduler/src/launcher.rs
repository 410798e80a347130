//! Task launcher — the foreground path for running one-off work.
//!
//! Grows the cluster for the new work, asks the orchestration service to
//! start every copy, and hands whatever it could not place to the
//! [`TaskScheduler`]. The caller always gets a record per copy: a real task
//! or a placeholder. With a [`ScalerDispatcher`] attached, every launch also
//! requests an environment scaler run.

use std::sync::Arc;

use capgrid_autoscale::{ClusterScaler, ScalerDispatcher};
use capgrid_provider::{ContainerOverride, OrchestrationApi, Task};
use tracing::info;

use crate::error::SchedulerResult;
use crate::scheduler::TaskScheduler;

#[derive(Clone)]
pub struct TaskLauncher {
    scaler: ClusterScaler,
    orchestration: Arc<dyn OrchestrationApi>,
    scheduler: TaskScheduler,
    dispatcher: Option<ScalerDispatcher>,
}

impl TaskLauncher {
    pub fn new(scaler: ClusterScaler, scheduler: TaskScheduler) -> Self {
        let orchestration = scaler.resources().orchestration().clone();
        Self {
            scaler,
            orchestration,
            scheduler,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: ScalerDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub async fn launch(
        &self,
        environment_id: &str,
        task_id: &str,
        task_definition: &str,
        count: u32,
        overrides: Vec<ContainerOverride>,
    ) -> SchedulerResult<Vec<Task>> {
        let outcome = self
            .scaler
            .trigger_scaling_algorithm(environment_id, Some(task_definition), count)
            .await?;

        let result = self
            .orchestration
            .run_task(environment_id, task_definition, count, task_id, &overrides)
            .await;

        let (mut tasks, deferred) = match result {
            Ok(output) => {
                let deferred = output.failures.len();
                (output.tasks, deferred)
            }
            Err(e) if e.is_insufficient_capacity() => (Vec::new(), count as usize),
            Err(e) => return Err(e.into()),
        };

        if deferred > 0 {
            self.scheduler
                .add_task(task_id, task_definition, environment_id, deferred, overrides)
                .await;
        }

        info!(
            environment = %environment_id,
            %task_id,
            started = tasks.len(),
            deferred,
            nodes_added = outcome.nodes_added,
            "task launched"
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.schedule_run(environment_id).await;
        }

        tasks.extend(self.scheduler.get_task(task_id).await);
        Ok(tasks)
    }
}
