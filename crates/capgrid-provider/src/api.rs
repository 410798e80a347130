//! Collaborator interfaces.
//!
//! The control plane never talks to the managed services directly; it goes
//! through these traits. Implementations must be safe for concurrent use:
//! background loops and foreground calls share them through `Arc`.

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::*;

/// The managed container-orchestration service.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    /// ARNs of every node registered in the cluster.
    async fn list_container_instances(&self, cluster: &str) -> ProviderResult<Vec<String>>;

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> ProviderResult<DescribeContainerInstancesOutput>;

    async fn list_services(&self, cluster: &str) -> ProviderResult<Vec<String>>;

    async fn describe_services(&self, cluster: &str, arns: &[String]) -> ProviderResult<Vec<Service>>;

    async fn describe_task_definition(&self, task_definition: &str) -> ProviderResult<TaskDefinition>;

    /// Start `count` copies of a task definition. Copies the service
    /// could not place come back in `failures`.
    async fn run_task(
        &self,
        cluster: &str,
        task_definition: &str,
        count: u32,
        started_by: &str,
        overrides: &[ContainerOverride],
    ) -> ProviderResult<RunTaskOutput>;
}

/// The managed autoscaling group service.
#[async_trait]
pub trait FleetManager: Send + Sync {
    async fn describe_auto_scaling_group(&self, name: &str) -> ProviderResult<AutoScalingGroup>;

    async fn describe_launch_configuration(&self, name: &str) -> ProviderResult<LaunchConfiguration>;

    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> ProviderResult<()>;

    async fn update_auto_scaling_group(&self, name: &str, update: GroupSizeUpdate) -> ProviderResult<()>;

    /// Terminate one member. With `decrement_desired_capacity` false the
    /// group launches a replacement.
    async fn terminate_instance_in_auto_scaling_group(
        &self,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> ProviderResult<()>;
}

/// The workload registry ("backend") that knows about environments and
/// one-off tasks across the whole fleet.
#[async_trait]
pub trait WorkloadRegistry: Send + Sync {
    async fn list_environments(&self) -> ProviderResult<Vec<EnvironmentSummary>>;

    /// Every one-off task fleet-wide with its in-flight copies.
    async fn list_tasks(&self) -> ProviderResult<Vec<WorkloadTask>>;
}
