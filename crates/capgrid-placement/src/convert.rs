//! Type conversions between provider types and the fit model.
//!
//! Bridges `capgrid_provider::{ContainerInstance, TaskDefinition}` to
//! [`NodeResources`] and [`WorkloadDemand`].

use std::collections::BTreeSet;

use capgrid_provider::{
    ContainerDefinition, ContainerInstance, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PORTS,
    RESOURCE_PORTS_UDP, ResourceValue, TaskDefinition, TransportProtocol,
};
use tracing::warn;

use crate::fit::{NodeResources, WorkloadDemand, mib_to_bytes};

/// Convert a node's *remaining* counters into a snapshot.
///
/// Missing counters read as zero. Port entries that are not valid port
/// numbers are logged and skipped.
pub fn instance_to_resources(instance: &ContainerInstance) -> NodeResources {
    let task_count = instance.running_tasks_count + instance.pending_tasks_count;

    NodeResources {
        node_id: instance.ec2_instance_id.clone(),
        cpu: integer_resource(instance, RESOURCE_CPU),
        memory_bytes: mib_to_bytes(integer_resource(instance, RESOURCE_MEMORY)),
        tcp_ports: port_resource(instance, RESOURCE_PORTS),
        udp_ports: port_resource(instance, RESOURCE_PORTS_UDP),
        task_count,
        in_use: task_count > 0,
    }
}

fn integer_resource(instance: &ContainerInstance, name: &str) -> u64 {
    match instance.resource(name) {
        Some(ResourceValue::Integer(v)) => (*v).max(0) as u64,
        _ => 0,
    }
}

fn port_resource(instance: &ContainerInstance, name: &str) -> BTreeSet<u16> {
    let Some(ResourceValue::StringSet(values)) = instance.resource(name) else {
        return BTreeSet::new();
    };

    values
        .iter()
        .filter_map(|raw| match raw.trim().parse::<u16>() {
            Ok(port) => Some(port),
            Err(e) => {
                warn!(
                    node = %instance.ec2_instance_id,
                    resource = name,
                    value = %raw,
                    error = %e,
                    "skipping unparsable port"
                );
                None
            }
        })
        .collect()
}

/// Sum one copy's needs across every container of a task definition.
pub fn task_definition_to_demand(task_definition: &TaskDefinition) -> WorkloadDemand {
    let mut demand = WorkloadDemand::default();

    for container in &task_definition.containers {
        demand.cpu += container.cpu;
        demand.memory_bytes += mib_to_bytes(container_memory_mib(container));

        for mapping in &container.port_mappings {
            let Some(host_port) = mapping.host_port else {
                continue;
            };
            match mapping.protocol.unwrap_or(TransportProtocol::Tcp) {
                TransportProtocol::Tcp => demand.tcp_ports.insert(host_port),
                TransportProtocol::Udp => demand.udp_ports.insert(host_port),
            };
        }
    }

    demand
}

/// Hard limit when set, otherwise the soft reservation, otherwise zero.
fn container_memory_mib(container: &ContainerDefinition) -> u64 {
    container
        .memory
        .or(container.memory_reservation)
        .unwrap_or(0)
}
