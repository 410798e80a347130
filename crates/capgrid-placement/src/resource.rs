//! Resource manager — the only component that reads node capacity and
//! writes the fleet's size.
//!
//! Every decision re-reads the autoscaling group; nothing here caches
//! fleet state between calls.

use std::sync::Arc;

use capgrid_core::Waiter;
use capgrid_core::config::DEFAULT_AGENT_RESERVED_PORTS;
use capgrid_provider::{ContainerInstance, FleetManager, GroupSizeUpdate, OrchestrationApi};
use tracing::{debug, info, warn};

use crate::convert::instance_to_resources;
use crate::error::{ResourceError, ResourceResult};
use crate::fit::{NodeResources, mib_to_bytes};
use crate::instance_types::{CPU_UNITS_PER_VCPU, instance_spec};

/// Node id given to the estimate of a node that does not exist yet.
pub const NEW_NODE_ID: &str = "new-node";

#[derive(Clone)]
pub struct ResourceManager {
    orchestration: Arc<dyn OrchestrationApi>,
    fleet: Arc<dyn FleetManager>,
    reserved_ports: Vec<u16>,
}

impl ResourceManager {
    pub fn new(orchestration: Arc<dyn OrchestrationApi>, fleet: Arc<dyn FleetManager>) -> Self {
        Self {
            orchestration,
            fleet,
            reserved_ports: DEFAULT_AGENT_RESERVED_PORTS.to_vec(),
        }
    }

    /// Override the host ports a fresh node's agent binds.
    pub fn with_reserved_ports(mut self, ports: Vec<u16>) -> Self {
        self.reserved_ports = ports;
        self
    }

    pub fn orchestration(&self) -> &Arc<dyn OrchestrationApi> {
        &self.orchestration
    }

    pub fn fleet(&self) -> &Arc<dyn FleetManager> {
        &self.fleet
    }

    /// Every container instance the service can describe in the
    /// environment, whatever its state.
    ///
    /// Nodes the service could not describe are logged and left out unless
    /// none could be described at all.
    pub async fn describe_nodes(&self, environment_id: &str) -> ResourceResult<Vec<ContainerInstance>> {
        let arns = self.orchestration.list_container_instances(environment_id).await?;
        if arns.is_empty() {
            return Ok(Vec::new());
        }

        let described = self
            .orchestration
            .describe_container_instances(environment_id, &arns)
            .await?;

        if !described.failures.is_empty() {
            let reasons = described
                .failures
                .iter()
                .map(|f| format!("{} ({})", f.arn, f.reason))
                .collect::<Vec<_>>()
                .join(", ");

            if described.instances.is_empty() {
                return Err(ResourceError::DescribeFailed {
                    environment: environment_id.to_string(),
                    reasons,
                });
            }
            warn!(environment = %environment_id, %reasons, "some container instances could not be described");
        }

        Ok(described.instances)
    }

    /// Snapshots of every active, connected node in the environment.
    pub async fn list_node_resources(&self, environment_id: &str) -> ResourceResult<Vec<NodeResources>> {
        let described = self.describe_nodes(environment_id).await?;

        let mut nodes = Vec::with_capacity(described.len());
        for instance in &described {
            if !instance.is_active() || !instance.agent_connected {
                debug!(
                    environment = %environment_id,
                    node = %instance.ec2_instance_id,
                    status = %instance.status,
                    agent_connected = instance.agent_connected,
                    "skipping unavailable node"
                );
                continue;
            }
            nodes.push(instance_to_resources(instance));
        }

        Ok(nodes)
    }

    /// What a node freshly launched by the environment's group would offer.
    pub async fn estimate_new_node_resources(&self, environment_id: &str) -> ResourceResult<NodeResources> {
        let group = self.fleet.describe_auto_scaling_group(environment_id).await?;
        let config_name = group
            .launch_configuration_name
            .ok_or_else(|| ResourceError::MissingLaunchConfiguration(environment_id.to_string()))?;
        let config = self.fleet.describe_launch_configuration(&config_name).await?;

        let spec = instance_spec(&config.instance_type)
            .ok_or_else(|| ResourceError::UnknownInstanceType(config.instance_type.clone()))?;

        Ok(NodeResources {
            node_id: NEW_NODE_ID.to_string(),
            cpu: spec.vcpus * CPU_UNITS_PER_VCPU,
            memory_bytes: mib_to_bytes(spec.memory_mib),
            tcp_ports: self.reserved_ports.iter().copied().collect(),
            udp_ports: Default::default(),
            task_count: 0,
            in_use: false,
        })
    }

    /// Move the environment's desired capacity to `target`.
    ///
    /// Scaling up raises the group's max first when needed. Scaling down
    /// never goes below the group's min, and terminates at most
    /// `desired - target` of `idle_nodes`, in order, letting the group keep
    /// its new desired count. Returns the desired capacity afterwards.
    pub async fn scale_to(&self, environment_id: &str, target: u32, idle_nodes: &[NodeResources]) -> ResourceResult<u32> {
        let group = self.fleet.describe_auto_scaling_group(environment_id).await?;
        let current = group.desired_capacity;

        if target > current {
            if target > group.max_size {
                info!(environment = %environment_id, from = group.max_size, to = target, "raising group max size");
                self.fleet
                    .update_auto_scaling_group(
                        environment_id,
                        GroupSizeUpdate {
                            max_size: Some(target),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            info!(environment = %environment_id, from = current, to = target, "scaling up");
            self.fleet.set_desired_capacity(environment_id, target).await?;
            return Ok(target);
        }

        if target == current {
            debug!(environment = %environment_id, desired = current, "already at target scale");
            return Ok(current);
        }

        let mut target = target;
        if target < group.min_size {
            warn!(
                environment = %environment_id,
                requested = target,
                min = group.min_size,
                "requested scale is below group minimum, clamping"
            );
            target = group.min_size;
        }
        if target == current {
            return Ok(current);
        }

        info!(environment = %environment_id, from = current, to = target, "scaling down");
        self.fleet.set_desired_capacity(environment_id, target).await?;

        let to_remove = ((current - target) as usize).min(idle_nodes.len());
        for node in &idle_nodes[..to_remove] {
            info!(environment = %environment_id, node = %node.node_id, "terminating idle node");
            self.fleet
                .terminate_instance_in_auto_scaling_group(&node.node_id, false)
                .await?;
        }

        Ok(target)
    }

    /// Poll until at least `expected` nodes are usable in the environment.
    pub async fn wait_for_active_nodes(&self, environment_id: &str, expected: usize, waiter: &Waiter) -> ResourceResult<()> {
        waiter
            .wait(move || async move {
                let visible = self.list_node_resources(environment_id).await?.len();
                debug!(environment = %environment_id, visible, expected, "waiting for nodes");
                Ok::<bool, ResourceError>(visible >= expected)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use capgrid_core::{ManualClock, WaitError};
    use capgrid_provider::{ContainerInstance, FleetCall, MemoryCloud, Operation, ProviderError};

    use super::*;

    fn manager(cloud: &MemoryCloud) -> ResourceManager {
        ResourceManager::new(Arc::new(cloud.clone()), Arc::new(cloud.clone()))
    }

    fn idle(id: &str) -> NodeResources {
        NodeResources {
            node_id: id.to_string(),
            cpu: 1024,
            memory_bytes: mib_to_bytes(1024),
            tcp_ports: Default::default(),
            udp_ports: Default::default(),
            task_count: 0,
            in_use: false,
        }
    }

    #[tokio::test]
    async fn lists_only_active_connected_nodes() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.medium");
        cloud.put_container_instance("env", ContainerInstance::new("i-ok").with_remaining(2000, 4096));
        cloud.put_container_instance("env", ContainerInstance::new("i-drain").with_status("DRAINING"));
        cloud.put_container_instance("env", ContainerInstance::new("i-lost").disconnected());

        let nodes = manager(&cloud).list_node_resources("env").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "i-ok");
        assert_eq!(nodes[0].cpu, 2000);
    }

    #[tokio::test]
    async fn describe_error_propagates() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.medium");
        cloud.put_container_instance("env", ContainerInstance::new("i-1"));
        cloud.fail_next(Operation::DescribeContainerInstances, ProviderError::Unavailable("throttled".into()));

        let err = manager(&cloud).list_node_resources("env").await.unwrap_err();
        assert!(matches!(err, ResourceError::Provider(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn undescribable_nodes_are_skipped() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.medium");
        cloud.put_container_instance("env", ContainerInstance::new("i-ok").with_remaining(1024, 2048));
        cloud.put_vanished_instance("env", "arn:container-instance/i-gone");

        let nodes = manager(&cloud).list_node_resources("env").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "i-ok");
    }

    #[tokio::test]
    async fn every_describe_failing_is_an_error() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.medium");
        cloud.put_vanished_instance("env", "arn:container-instance/i-a");
        cloud.put_vanished_instance("env", "arn:container-instance/i-b");

        let err = manager(&cloud).list_node_resources("env").await.unwrap_err();
        match err {
            ResourceError::DescribeFailed { environment, reasons } => {
                assert_eq!(environment, "env");
                assert!(reasons.contains("i-a") && reasons.contains("i-b"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn estimates_new_node_from_launch_configuration() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "m4.large");

        let node = manager(&cloud).estimate_new_node_resources("env").await.unwrap();
        assert_eq!(node.cpu, 2048);
        assert_eq!(node.memory_bytes, mib_to_bytes(8192));
        assert_eq!(node.task_count, 0);
        assert!(!node.in_use);
        for port in DEFAULT_AGENT_RESERVED_PORTS {
            assert!(node.tcp_ports.contains(&port));
        }
    }

    #[tokio::test]
    async fn unknown_instance_type_is_an_error() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "q9.enormous");

        let err = manager(&cloud).estimate_new_node_resources("env").await.unwrap_err();
        assert!(matches!(err, ResourceError::UnknownInstanceType(t) if t == "q9.enormous"));
    }

    #[tokio::test]
    async fn scale_up_raises_max_before_desired() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 2, "t2.small");

        let desired = manager(&cloud).scale_to("env", 4, &[]).await.unwrap();
        assert_eq!(desired, 4);

        let group = cloud.group("env").unwrap();
        assert_eq!((group.max_size, group.desired_capacity), (4, 4));
        assert!(matches!(cloud.fleet_calls()[0], FleetCall::UpdateGroup { .. }));
        assert!(matches!(cloud.fleet_calls()[1], FleetCall::SetDesiredCapacity { capacity: 4, .. }));
    }

    #[tokio::test]
    async fn scale_down_terminates_first_idle_nodes() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 2, 10, "t2.small");
        for id in ["A", "B", "C", "D", "E"] {
            cloud.put_container_instance("env", ContainerInstance::new(id));
        }
        cloud.set_desired_capacity("env", 5).await.unwrap();

        let idle_nodes: Vec<_> = ["A", "B", "C", "D"].into_iter().map(idle).collect();
        let desired = manager(&cloud).scale_to("env", 3, &idle_nodes).await.unwrap();
        assert_eq!(desired, 3);

        let calls = cloud.fleet_calls();
        assert_eq!(
            &calls[1..],
            &[
                FleetCall::SetDesiredCapacity { group: "env".into(), capacity: 3 },
                FleetCall::Terminate { instance_id: "A".into(), decrement: false },
                FleetCall::Terminate { instance_id: "B".into(), decrement: false },
            ]
        );
        let remaining: Vec<_> = cloud.container_instances("env").into_iter().map(|n| n.ec2_instance_id).collect();
        assert_eq!(remaining, vec!["C", "D", "E"]);
    }

    #[tokio::test]
    async fn scale_down_clamps_to_min() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 2, 10, "t2.small");
        for id in ["A", "B", "C"] {
            cloud.put_container_instance("env", ContainerInstance::new(id));
        }
        cloud.set_desired_capacity("env", 3).await.unwrap();

        let idle_nodes: Vec<_> = ["A", "B", "C"].into_iter().map(idle).collect();
        let desired = manager(&cloud).scale_to("env", 0, &idle_nodes).await.unwrap();
        assert_eq!(desired, 2);
        assert_eq!(cloud.group("env").unwrap().desired_capacity, 2);
        assert_eq!(cloud.container_instances("env").len(), 2);
    }

    #[tokio::test]
    async fn scale_down_terminates_only_idle_nodes() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 10, "t2.small");
        for id in ["A", "B", "C", "D", "E"] {
            cloud.put_container_instance("env", ContainerInstance::new(id));
        }
        cloud.set_desired_capacity("env", 5).await.unwrap();

        let desired = manager(&cloud).scale_to("env", 2, &[idle("C")]).await.unwrap();
        assert_eq!(desired, 2);

        let terminations: Vec<_> = cloud
            .fleet_calls()
            .into_iter()
            .filter(|c| matches!(c, FleetCall::Terminate { .. }))
            .collect();
        assert_eq!(
            terminations,
            vec![FleetCall::Terminate { instance_id: "C".into(), decrement: false }]
        );
        assert_eq!(cloud.container_instances("env").len(), 4);
    }

    #[tokio::test]
    async fn repeated_scale_down_is_idempotent() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 1, 10, "t2.small");
        for id in ["A", "B", "C"] {
            cloud.put_container_instance("env", ContainerInstance::new(id));
        }
        cloud.set_desired_capacity("env", 3).await.unwrap();
        let manager = manager(&cloud);

        let first = manager.scale_to("env", 1, &[idle("A"), idle("B")]).await.unwrap();
        let calls_after_first = cloud.fleet_calls().len();

        let second = manager.scale_to("env", 1, &[idle("C")]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cloud.fleet_calls().len(), calls_after_first);
        assert_eq!(cloud.container_instances("env").len(), 1);
    }

    #[tokio::test]
    async fn scale_to_current_is_a_no_op() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 1, 10, "t2.small");

        manager(&cloud).scale_to("env", 1, &[idle("A")]).await.unwrap();
        assert!(cloud.fleet_calls().is_empty());
    }

    #[tokio::test]
    async fn wait_for_active_nodes_exhausts() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.small");
        let clock = Arc::new(ManualClock::at_fixed_start());
        let waiter = Waiter::new("nodes", 3, Duration::from_secs(5), clock.clone());

        let err = manager(&cloud)
            .wait_for_active_nodes("env", 1, &waiter)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Wait(WaitError::Exhausted { attempts: 3, .. })));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn wait_for_active_nodes_succeeds_once_visible() {
        let cloud = MemoryCloud::new();
        cloud.add_environment("env", 0, 5, "t2.small");
        cloud.put_container_instance("env", ContainerInstance::new("i-1"));
        let waiter = Waiter::new("nodes", 1, Duration::from_secs(5), Arc::new(ManualClock::at_fixed_start()));

        manager(&cloud).wait_for_active_nodes("env", 1, &waiter).await.unwrap();
    }
}
