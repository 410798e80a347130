//! A workload registry that also sees the scheduler's waiting copies.
//!
//! The scalers learn about capacity-blocked one-off work through the
//! registry. Wrapping the backing registry this way lets copies held by a
//! [`TaskScheduler`] drive scale-up without anything else knowing about
//! the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use capgrid_provider::{EnvironmentSummary, ProviderResult, WorkloadRegistry, WorkloadTask};

use crate::scheduler::TaskScheduler;

#[derive(Clone)]
pub struct ScheduledWorkloads {
    backing: Arc<dyn WorkloadRegistry>,
    scheduler: TaskScheduler,
}

impl ScheduledWorkloads {
    pub fn new(backing: Arc<dyn WorkloadRegistry>, scheduler: TaskScheduler) -> Self {
        Self { backing, scheduler }
    }
}

#[async_trait]
impl WorkloadRegistry for ScheduledWorkloads {
    async fn list_environments(&self) -> ProviderResult<Vec<EnvironmentSummary>> {
        self.backing.list_environments().await
    }

    async fn list_tasks(&self) -> ProviderResult<Vec<WorkloadTask>> {
        let mut tasks = self.backing.list_tasks().await?;
        for scheduled in self.scheduler.workloads().await {
            match tasks.iter_mut().find(|t| t.task_id == scheduled.task_id) {
                Some(existing) => existing.copies.extend(scheduled.copies),
                None => tasks.push(scheduled),
            }
        }
        Ok(tasks)
    }
}
