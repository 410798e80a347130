//! In-memory cloud — an in-process stand-in for all three collaborators.
//!
//! `MemoryCloud` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Mutex<..>>`) and implements [`OrchestrationApi`],
//! [`FleetManager`] and [`WorkloadRegistry`]. It records every fleet write
//! so callers can assert on exactly what was asked of the fleet, and it
//! supports one-shot error injection per operation.
//!
//! `run_task` follows a script when one is queued; otherwise it places
//! copies on the first active, connected node and fails with the
//! "no container instances" error when the cluster is empty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::api::{FleetManager, OrchestrationApi, WorkloadRegistry};
use crate::error::{NO_CONTAINER_INSTANCES_MSG, ProviderError, ProviderResult};
use crate::types::*;

/// Operations that accept injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListContainerInstances,
    DescribeContainerInstances,
    ListServices,
    DescribeServices,
    DescribeTaskDefinition,
    RunTask,
    DescribeAutoScalingGroup,
    DescribeLaunchConfiguration,
    SetDesiredCapacity,
    UpdateAutoScalingGroup,
    TerminateInstance,
    ListEnvironments,
    ListTasks,
}

/// A write issued against the fleet manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetCall {
    SetDesiredCapacity { group: String, capacity: u32 },
    UpdateGroup { group: String, update: GroupSizeUpdate },
    Terminate { instance_id: String, decrement: bool },
}

#[derive(Default)]
struct Cluster {
    instances: Vec<ContainerInstance>,
    /// Listed but gone by the time they are described.
    vanished: Vec<String>,
    services: Vec<Service>,
}

#[derive(Default)]
struct CloudState {
    clusters: HashMap<String, Cluster>,
    task_definitions: HashMap<String, TaskDefinition>,
    groups: HashMap<String, AutoScalingGroup>,
    launch_configurations: HashMap<String, LaunchConfiguration>,
    environments: Vec<EnvironmentSummary>,
    registry_tasks: Vec<WorkloadTask>,
    run_task_script: VecDeque<ProviderResult<RunTaskOutput>>,
    injected: HashMap<Operation, VecDeque<ProviderError>>,
    fleet_calls: Vec<FleetCall>,
    run_task_calls: usize,
    next_task: u64,
}

#[derive(Clone, Default)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ────────────────────────────────────────────────────

    /// Register an environment with an empty cluster and a group of the
    /// given bounds using `instance_type` nodes.
    pub fn add_environment(&self, environment_id: &str, min: u32, max: u32, instance_type: &str) {
        let launch_config = format!("{environment_id}-lc");
        let mut state = self.lock();
        state.environments.push(EnvironmentSummary {
            environment_id: environment_id.to_string(),
            name: environment_id.to_string(),
        });
        state.clusters.entry(environment_id.to_string()).or_default();
        state.launch_configurations.insert(
            launch_config.clone(),
            LaunchConfiguration {
                name: launch_config.clone(),
                instance_type: instance_type.to_string(),
                image_id: "ami-capgrid".to_string(),
            },
        );
        state.groups.insert(
            environment_id.to_string(),
            AutoScalingGroup {
                name: environment_id.to_string(),
                min_size: min,
                max_size: max,
                desired_capacity: min,
                instances: Vec::new(),
                launch_configuration_name: Some(launch_config),
            },
        );
    }

    pub fn put_group(&self, group: AutoScalingGroup) {
        self.lock().groups.insert(group.name.clone(), group);
    }

    pub fn put_launch_configuration(&self, config: LaunchConfiguration) {
        self.lock()
            .launch_configurations
            .insert(config.name.clone(), config);
    }

    /// Add a node to a cluster and make it a member of the same-named group.
    pub fn put_container_instance(&self, cluster: &str, instance: ContainerInstance) {
        let mut state = self.lock();
        if let Some(group) = state.groups.get_mut(cluster)
            && !group.instances.contains(&instance.ec2_instance_id)
        {
            group.instances.push(instance.ec2_instance_id.clone());
        }
        let nodes = &mut state.clusters.entry(cluster.to_string()).or_default().instances;
        match nodes
            .iter_mut()
            .find(|n| n.ec2_instance_id == instance.ec2_instance_id)
        {
            Some(existing) => *existing = instance,
            None => nodes.push(instance),
        }
    }

    /// List `arn` in the cluster without it being describable, as a node
    /// that deregisters between the list and describe calls.
    pub fn put_vanished_instance(&self, cluster: &str, arn: &str) {
        self.lock()
            .clusters
            .entry(cluster.to_string())
            .or_default()
            .vanished
            .push(arn.to_string());
    }

    pub fn put_service(&self, cluster: &str, service: Service) {
        let mut state = self.lock();
        let services = &mut state.clusters.entry(cluster.to_string()).or_default().services;
        services.retain(|s| s.arn != service.arn);
        services.push(service);
    }

    pub fn put_task_definition(&self, task_definition: TaskDefinition) {
        self.lock()
            .task_definitions
            .insert(task_definition.id.clone(), task_definition);
    }

    pub fn put_registry_task(&self, task: WorkloadTask) {
        let mut state = self.lock();
        state.registry_tasks.retain(|t| t.task_id != task.task_id);
        state.registry_tasks.push(task);
    }

    /// Queue the outcome of the next `run_task` call.
    pub fn script_run_task(&self, result: ProviderResult<RunTaskOutput>) {
        self.lock().run_task_script.push_back(result);
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: ProviderError) {
        self.lock()
            .injected
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn group(&self, name: &str) -> Option<AutoScalingGroup> {
        self.lock().groups.get(name).cloned()
    }

    pub fn container_instances(&self, cluster: &str) -> Vec<ContainerInstance> {
        self.lock()
            .clusters
            .get(cluster)
            .map(|c| c.instances.clone())
            .unwrap_or_default()
    }

    pub fn fleet_calls(&self) -> Vec<FleetCall> {
        self.lock().fleet_calls.clone()
    }

    pub fn run_task_calls(&self) -> usize {
        self.lock().run_task_calls
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CloudState {
    fn injected(&mut self, operation: Operation) -> ProviderResult<()> {
        match self.injected.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn cluster(&self, name: &str) -> ProviderResult<&Cluster> {
        self.clusters
            .get(name)
            .ok_or_else(|| ProviderError::NotFound(format!("cluster {name}")))
    }

    fn group_mut(&mut self, name: &str) -> ProviderResult<&mut AutoScalingGroup> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(format!("auto scaling group {name}")))
    }

    fn next_task_arn(&mut self) -> String {
        self.next_task += 1;
        format!("arn:task/{:08}", self.next_task)
    }
}

fn validate_bounds(group: &AutoScalingGroup) -> ProviderResult<()> {
    if group.min_size > group.desired_capacity || group.desired_capacity > group.max_size {
        return Err(ProviderError::api(
            "ValidationError",
            format!(
                "desired capacity {} must be within [{}, {}] for group {}",
                group.desired_capacity, group.min_size, group.max_size, group.name
            ),
        ));
    }
    Ok(())
}

#[async_trait]
impl OrchestrationApi for MemoryCloud {
    async fn list_container_instances(&self, cluster: &str) -> ProviderResult<Vec<String>> {
        let mut state = self.lock();
        state.injected(Operation::ListContainerInstances)?;
        let cluster = state.cluster(cluster)?;
        Ok(cluster
            .instances
            .iter()
            .map(|i| i.arn.clone())
            .chain(cluster.vanished.iter().cloned())
            .collect())
    }

    async fn describe_container_instances(
        &self,
        cluster: &str,
        arns: &[String],
    ) -> ProviderResult<DescribeContainerInstancesOutput> {
        let mut state = self.lock();
        state.injected(Operation::DescribeContainerInstances)?;
        let nodes = &state.cluster(cluster)?.instances;

        let mut output = DescribeContainerInstancesOutput::default();
        for arn in arns {
            match nodes.iter().find(|n| &n.arn == arn) {
                Some(node) => output.instances.push(node.clone()),
                None => output.failures.push(Failure {
                    arn: arn.clone(),
                    reason: "MISSING".to_string(),
                }),
            }
        }
        Ok(output)
    }

    async fn list_services(&self, cluster: &str) -> ProviderResult<Vec<String>> {
        let mut state = self.lock();
        state.injected(Operation::ListServices)?;
        Ok(state
            .cluster(cluster)?
            .services
            .iter()
            .map(|s| s.arn.clone())
            .collect())
    }

    async fn describe_services(&self, cluster: &str, arns: &[String]) -> ProviderResult<Vec<Service>> {
        let mut state = self.lock();
        state.injected(Operation::DescribeServices)?;
        Ok(state
            .cluster(cluster)?
            .services
            .iter()
            .filter(|s| arns.contains(&s.arn))
            .cloned()
            .collect())
    }

    async fn describe_task_definition(&self, task_definition: &str) -> ProviderResult<TaskDefinition> {
        let mut state = self.lock();
        state.injected(Operation::DescribeTaskDefinition)?;
        state
            .task_definitions
            .get(task_definition)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("task definition {task_definition}")))
    }

    async fn run_task(
        &self,
        cluster: &str,
        task_definition: &str,
        count: u32,
        started_by: &str,
        _overrides: &[ContainerOverride],
    ) -> ProviderResult<RunTaskOutput> {
        let mut state = self.lock();
        state.run_task_calls += 1;
        state.injected(Operation::RunTask)?;

        if let Some(scripted) = state.run_task_script.pop_front() {
            debug!(%cluster, %task_definition, ok = scripted.is_ok(), "scripted run_task");
            return scripted;
        }

        let has_node = state
            .cluster(cluster)?
            .instances
            .iter()
            .any(|n| n.is_active() && n.agent_connected);
        if !has_node {
            return Err(ProviderError::api(
                "InvalidParameterException",
                NO_CONTAINER_INSTANCES_MSG,
            ));
        }

        let mut tasks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let task_arn = state.next_task_arn();
            tasks.push(Task {
                task_arn,
                cluster_arn: cluster_arn(cluster),
                task_definition_arn: task_definition_arn(task_definition),
                started_by: started_by.to_string(),
                last_status: STATUS_PENDING.to_string(),
                desired_status: STATUS_RUNNING.to_string(),
                stopped_reason: None,
                containers: Vec::new(),
            });
        }

        if let Some(node) = state
            .clusters
            .get_mut(cluster)
            .and_then(|c| c.instances.iter_mut().find(|n| n.is_active() && n.agent_connected))
        {
            node.pending_tasks_count += u64::from(count);
        }

        Ok(RunTaskOutput {
            tasks,
            failures: Vec::new(),
        })
    }
}

#[async_trait]
impl FleetManager for MemoryCloud {
    async fn describe_auto_scaling_group(&self, name: &str) -> ProviderResult<AutoScalingGroup> {
        let mut state = self.lock();
        state.injected(Operation::DescribeAutoScalingGroup)?;
        Ok(state.group_mut(name)?.clone())
    }

    async fn describe_launch_configuration(&self, name: &str) -> ProviderResult<LaunchConfiguration> {
        let mut state = self.lock();
        state.injected(Operation::DescribeLaunchConfiguration)?;
        state
            .launch_configurations
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("launch configuration {name}")))
    }

    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> ProviderResult<()> {
        let mut state = self.lock();
        state.injected(Operation::SetDesiredCapacity)?;

        let mut updated = state.group_mut(name)?.clone();
        updated.desired_capacity = capacity;
        validate_bounds(&updated)?;
        state.groups.insert(name.to_string(), updated);

        state.fleet_calls.push(FleetCall::SetDesiredCapacity {
            group: name.to_string(),
            capacity,
        });
        Ok(())
    }

    async fn update_auto_scaling_group(&self, name: &str, update: GroupSizeUpdate) -> ProviderResult<()> {
        let mut state = self.lock();
        state.injected(Operation::UpdateAutoScalingGroup)?;

        let mut updated = state.group_mut(name)?.clone();
        if let Some(min) = update.min_size {
            updated.min_size = min;
        }
        if let Some(max) = update.max_size {
            updated.max_size = max;
        }
        if let Some(desired) = update.desired_capacity {
            updated.desired_capacity = desired;
        }
        validate_bounds(&updated)?;
        state.groups.insert(name.to_string(), updated);

        state.fleet_calls.push(FleetCall::UpdateGroup {
            group: name.to_string(),
            update,
        });
        Ok(())
    }

    async fn terminate_instance_in_auto_scaling_group(
        &self,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        state.injected(Operation::TerminateInstance)?;

        let group = state
            .groups
            .values_mut()
            .find(|g| g.instances.iter().any(|i| i == instance_id))
            .ok_or_else(|| ProviderError::NotFound(format!("instance {instance_id}")))?;

        if decrement_desired_capacity {
            if group.desired_capacity <= group.min_size {
                return Err(ProviderError::api(
                    "ValidationError",
                    format!("terminating {instance_id} would take group {} below its minimum", group.name),
                ));
            }
            group.desired_capacity -= 1;
        }
        group.instances.retain(|i| i != instance_id);

        for cluster in state.clusters.values_mut() {
            cluster.instances.retain(|n| n.ec2_instance_id != instance_id);
        }

        state.fleet_calls.push(FleetCall::Terminate {
            instance_id: instance_id.to_string(),
            decrement: decrement_desired_capacity,
        });
        Ok(())
    }
}

#[async_trait]
impl WorkloadRegistry for MemoryCloud {
    async fn list_environments(&self) -> ProviderResult<Vec<EnvironmentSummary>> {
        let mut state = self.lock();
        state.injected(Operation::ListEnvironments)?;
        Ok(state.environments.clone())
    }

    async fn list_tasks(&self) -> ProviderResult<Vec<WorkloadTask>> {
        let mut state = self.lock();
        state.injected(Operation::ListTasks)?;
        Ok(state.registry_tasks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_with_env() -> MemoryCloud {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env-a", 1, 5, "t2.medium");
        cloud
    }

    #[tokio::test]
    async fn describe_reports_missing_nodes_as_failures() {
        let cloud = cloud_with_env();
        cloud.put_container_instance("env-a", ContainerInstance::new("i-1"));

        let arns = vec![
            "arn:container-instance/i-1".to_string(),
            "arn:container-instance/i-gone".to_string(),
        ];
        let out = cloud.describe_container_instances("env-a", &arns).await.unwrap();

        assert_eq!(out.instances.len(), 1);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].arn, "arn:container-instance/i-gone");
    }

    #[tokio::test]
    async fn vanished_instances_are_listed_but_not_described() {
        let cloud = cloud_with_env();
        cloud.put_container_instance("env-a", ContainerInstance::new("i-1"));
        cloud.put_vanished_instance("env-a", "arn:container-instance/i-gone");

        let arns = cloud.list_container_instances("env-a").await.unwrap();
        assert_eq!(arns.len(), 2);

        let out = cloud.describe_container_instances("env-a", &arns).await.unwrap();
        assert_eq!(out.instances.len(), 1);
        assert_eq!(out.failures[0].arn, "arn:container-instance/i-gone");
    }

    #[tokio::test]
    async fn desired_capacity_outside_bounds_is_rejected() {
        let cloud = cloud_with_env();

        let err = cloud.set_desired_capacity("env-a", 9).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref code, .. } if code == "ValidationError"));
        assert!(cloud.fleet_calls().is_empty());

        cloud.set_desired_capacity("env-a", 3).await.unwrap();
        assert_eq!(cloud.group("env-a").unwrap().desired_capacity, 3);
    }

    #[tokio::test]
    async fn terminate_with_decrement_lowers_desired() {
        let cloud = cloud_with_env();
        cloud.put_container_instance("env-a", ContainerInstance::new("i-1"));
        cloud.put_container_instance("env-a", ContainerInstance::new("i-2"));
        cloud.set_desired_capacity("env-a", 2).await.unwrap();

        cloud
            .terminate_instance_in_auto_scaling_group("i-1", true)
            .await
            .unwrap();

        let group = cloud.group("env-a").unwrap();
        assert_eq!(group.desired_capacity, 1);
        assert_eq!(group.instances, vec!["i-2".to_string()]);
        assert_eq!(cloud.container_instances("env-a").len(), 1);
    }

    #[tokio::test]
    async fn terminate_unknown_instance_is_not_found() {
        let cloud = cloud_with_env();
        let err = cloud
            .terminate_instance_in_auto_scaling_group("i-nope", false)
            .await
            .unwrap_err();
        assert!(err.is_idempotent_done());
    }

    #[tokio::test]
    async fn run_task_on_empty_cluster_reports_capacity() {
        let cloud = cloud_with_env();
        let err = cloud.run_task("env-a", "api:1", 1, "t-1", &[]).await.unwrap_err();
        assert!(err.is_insufficient_capacity());
        assert_eq!(cloud.run_task_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_run_task_results_come_first() {
        let cloud = cloud_with_env();
        cloud.put_container_instance("env-a", ContainerInstance::new("i-1"));
        cloud.script_run_task(Err(ProviderError::InsufficientCapacity("full".into())));

        assert!(cloud.run_task("env-a", "api:1", 1, "t-1", &[]).await.is_err());
        let out = cloud.run_task("env-a", "api:1", 2, "t-1", &[]).await.unwrap();
        assert_eq!(out.tasks.len(), 2);
        assert_eq!(out.tasks[0].started_by, "t-1");
    }

    #[tokio::test]
    async fn injected_errors_fire_once() {
        let cloud = cloud_with_env();
        cloud.fail_next(Operation::ListEnvironments, ProviderError::Unavailable("x".into()));

        assert!(cloud.list_environments().await.is_err());
        assert_eq!(cloud.list_environments().await.unwrap().len(), 1);
    }
}
