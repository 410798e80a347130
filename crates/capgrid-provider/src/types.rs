//! Domain types exchanged with the orchestration service, the fleet
//! manager and the workload registry.
//!
//! These mirror the shapes the managed services return. Memory values are
//! in MiB, as the orchestration API reports them; conversion to bytes
//! happens in `capgrid-placement`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Environment identifier. Doubles as the cluster name and the
/// autoscaling group name.
pub type EnvironmentId = String;

/// Fleet instance id of a node.
pub type InstanceId = String;

/// Task definition reference, `family:revision`.
pub type TaskDefinitionId = String;

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_RUNNING: &str = "RUNNING";
pub const DEPLOYMENT_PRIMARY: &str = "PRIMARY";

/// Reason carried by a one-off copy that is waiting on cluster capacity.
pub const CLUSTER_CAPACITY_REASON: &str = "Waiting for cluster capacity to run";

pub const RESOURCE_CPU: &str = "CPU";
pub const RESOURCE_MEMORY: &str = "MEMORY";
pub const RESOURCE_PORTS: &str = "PORTS";
pub const RESOURCE_PORTS_UDP: &str = "PORTS_UDP";

// ── Nodes ──────────────────────────────────────────────────────────

/// A compute node registered with the orchestration service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerInstance {
    pub arn: String,
    pub ec2_instance_id: InstanceId,
    /// "ACTIVE", "DRAINING", "INACTIVE".
    pub status: String,
    pub agent_connected: bool,
    pub running_tasks_count: u64,
    pub pending_tasks_count: u64,
    /// Counters left after the node's current tasks are accounted for.
    /// Occupied host ports live here, not in the registered resources.
    pub remaining_resources: Vec<InstanceResource>,
}

/// A named resource counter on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceResource {
    pub name: String,
    pub value: ResourceValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResourceValue {
    Integer(i64),
    StringSet(Vec<String>),
}

impl ContainerInstance {
    /// An active, connected node with nothing reported yet.
    pub fn new(ec2_instance_id: &str) -> Self {
        Self {
            arn: format!("arn:container-instance/{ec2_instance_id}"),
            ec2_instance_id: ec2_instance_id.to_string(),
            status: STATUS_ACTIVE.to_string(),
            agent_connected: true,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            remaining_resources: Vec::new(),
        }
    }

    pub fn with_remaining(mut self, cpu: i64, memory_mib: i64) -> Self {
        self.set_resource(RESOURCE_CPU, ResourceValue::Integer(cpu));
        self.set_resource(RESOURCE_MEMORY, ResourceValue::Integer(memory_mib));
        self
    }

    pub fn with_tcp_ports(mut self, ports: &[u16]) -> Self {
        self.set_resource(RESOURCE_PORTS, port_set(ports));
        self
    }

    pub fn with_udp_ports(mut self, ports: &[u16]) -> Self {
        self.set_resource(RESOURCE_PORTS_UDP, port_set(ports));
        self
    }

    pub fn with_tasks(mut self, running: u64, pending: u64) -> Self {
        self.running_tasks_count = running;
        self.pending_tasks_count = pending;
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.agent_connected = false;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceValue> {
        self.remaining_resources
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.value)
    }

    fn set_resource(&mut self, name: &str, value: ResourceValue) {
        match self.remaining_resources.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.value = value,
            None => self.remaining_resources.push(InstanceResource {
                name: name.to_string(),
                value,
            }),
        }
    }
}

fn port_set(ports: &[u16]) -> ResourceValue {
    ResourceValue::StringSet(ports.iter().map(u16::to_string).collect())
}

/// Result of describing a batch of nodes. Nodes that could not be
/// described are reported as failures rather than failing the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DescribeContainerInstancesOutput {
    pub instances: Vec<ContainerInstance>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Failure {
    pub arn: String,
    pub reason: String,
}

// ── Services ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub arn: String,
    pub name: String,
    pub deployments: Vec<Deployment>,
}

/// One deployment of a service. Only the `PRIMARY` deployment is being
/// driven towards its desired count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: String,
    pub status: String,
    pub task_definition: TaskDefinitionId,
    pub desired_count: u64,
    pub running_count: u64,
    pub pending_count: u64,
}

impl Deployment {
    pub fn is_primary(&self) -> bool {
        self.status == DEPLOYMENT_PRIMARY
    }

    /// Copies the service still wants but that are neither running nor
    /// pending.
    pub fn shortfall(&self) -> u64 {
        self.desired_count
            .saturating_sub(self.running_count + self.pending_count)
    }
}

// ── Task definitions ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    /// `family:revision`.
    pub id: TaskDefinitionId,
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerDefinition {
    pub name: String,
    pub cpu: u64,
    /// Hard memory limit in MiB.
    pub memory: Option<u64>,
    /// Soft memory reservation in MiB.
    pub memory_reservation: Option<u64>,
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
    /// Absent means TCP.
    pub protocol: Option<TransportProtocol>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

// ── Tasks ──────────────────────────────────────────────────────────

/// Per-container environment overrides for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerOverride {
    pub container_name: String,
    pub environment: BTreeMap<String, String>,
}

/// A task instance as the orchestration service reports it. Placeholder
/// records for not-yet-placed copies use the same shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub started_by: String,
    pub last_status: String,
    pub desired_status: String,
    pub stopped_reason: Option<String>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub name: String,
    pub last_status: String,
    pub reason: Option<String>,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunTaskOutput {
    pub tasks: Vec<Task>,
    /// Copies the service refused to place, typically for lack of room.
    pub failures: Vec<Failure>,
}

pub fn cluster_arn(environment_id: &str) -> String {
    format!("arn:cluster/{environment_id}")
}

pub fn task_definition_arn(task_definition: &str) -> String {
    format!("arn:task-definition/{task_definition}")
}

// ── Fleet ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub instances: Vec<InstanceId>,
    pub launch_configuration_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchConfiguration {
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
}

/// Partial update of a group's size bounds. `None` leaves a field as is.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSizeUpdate {
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub desired_capacity: Option<u32>,
}

// ── Workload registry ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSummary {
    pub environment_id: EnvironmentId,
    pub name: String,
}

/// A one-off workload and every copy of it currently in flight,
/// including copies still waiting on capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadTask {
    pub task_id: String,
    pub environment_id: EnvironmentId,
    pub task_definition: TaskDefinitionId,
    pub copies: Vec<TaskCopy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskCopy {
    pub copy_id: String,
    pub reason: String,
    pub details: Vec<TaskDetail>,
}

impl TaskCopy {
    pub fn is_waiting_on_capacity(&self) -> bool {
        self.reason == CLUSTER_CAPACITY_REASON
    }

    pub fn has_pending_container(&self) -> bool {
        self.details.iter().any(|d| d.last_status == STATUS_PENDING)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskDetail {
    pub container_name: String,
    pub last_status: String,
    pub reason: String,
    pub exit_code: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_instance_builder_sets_resources() {
        let node = ContainerInstance::new("i-1")
            .with_remaining(2048, 4096)
            .with_tcp_ports(&[22, 80])
            .with_tasks(1, 2);

        assert!(node.is_active());
        assert_eq!(node.resource(RESOURCE_CPU), Some(&ResourceValue::Integer(2048)));
        assert_eq!(
            node.resource(RESOURCE_PORTS),
            Some(&ResourceValue::StringSet(vec!["22".to_string(), "80".to_string()]))
        );
        assert_eq!(node.running_tasks_count + node.pending_tasks_count, 3);
    }

    #[test]
    fn resource_setters_replace_existing_values() {
        let node = ContainerInstance::new("i-1")
            .with_remaining(100, 100)
            .with_remaining(50, 60);
        assert_eq!(node.remaining_resources.len(), 2);
        assert_eq!(node.resource(RESOURCE_MEMORY), Some(&ResourceValue::Integer(60)));
    }

    #[test]
    fn deployment_shortfall_never_underflows() {
        let mut deploy = Deployment {
            id: "d-1".to_string(),
            status: DEPLOYMENT_PRIMARY.to_string(),
            task_definition: "api:1".to_string(),
            desired_count: 5,
            running_count: 2,
            pending_count: 1,
        };
        assert_eq!(deploy.shortfall(), 2);

        deploy.running_count = 7;
        assert_eq!(deploy.shortfall(), 0);
    }

    #[test]
    fn task_copy_status_helpers() {
        let copy = TaskCopy {
            copy_id: "c-1".to_string(),
            reason: CLUSTER_CAPACITY_REASON.to_string(),
            details: vec![TaskDetail {
                container_name: "web".to_string(),
                last_status: STATUS_PENDING.to_string(),
                ..Default::default()
            }],
        };
        assert!(copy.is_waiting_on_capacity());
        assert!(copy.has_pending_container());
        assert!(!TaskCopy::default().is_waiting_on_capacity());
    }

    #[test]
    fn protocol_serializes_lowercase() {
        let json = serde_json::to_string(&TransportProtocol::Udp).unwrap();
        assert_eq!(json, "\"udp\"");
    }
}
