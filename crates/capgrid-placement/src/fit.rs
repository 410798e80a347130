//! Resource fit model.
//!
//! A [`NodeResources`] is a point-in-time snapshot of what a node has left;
//! a [`WorkloadDemand`] is what one copy of a workload needs. [`fits`] is
//! the only admission check the control plane uses.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub const BYTES_PER_MIB: u64 = 1024 * 1024;

pub fn mib_to_bytes(mib: u64) -> u64 {
    mib.saturating_mul(BYTES_PER_MIB)
}

/// Remaining capacity on a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResources {
    /// Fleet instance id.
    pub node_id: String,
    /// CPU units left (1024 per vCPU).
    pub cpu: u64,
    pub memory_bytes: u64,
    /// Host ports already bound.
    pub tcp_ports: BTreeSet<u16>,
    pub udp_ports: BTreeSet<u16>,
    /// Running plus pending tasks.
    pub task_count: u64,
    pub in_use: bool,
}

impl NodeResources {
    /// A copy of this snapshot with `demand` taken out of it.
    pub fn claim(&self, demand: &WorkloadDemand) -> NodeResources {
        let mut tcp_ports = self.tcp_ports.clone();
        tcp_ports.extend(&demand.tcp_ports);
        let mut udp_ports = self.udp_ports.clone();
        udp_ports.extend(&demand.udp_ports);

        NodeResources {
            node_id: self.node_id.clone(),
            cpu: self.cpu.saturating_sub(demand.cpu),
            memory_bytes: self.memory_bytes.saturating_sub(demand.memory_bytes),
            tcp_ports,
            udp_ports,
            task_count: self.task_count + 1,
            in_use: true,
        }
    }
}

/// What one copy of a workload needs, summed over its containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDemand {
    pub cpu: u64,
    pub memory_bytes: u64,
    pub tcp_ports: BTreeSet<u16>,
    pub udp_ports: BTreeSet<u16>,
}

/// Whether `demand` fits in what `node` has left.
pub fn fits(node: &NodeResources, demand: &WorkloadDemand) -> bool {
    node.cpu >= demand.cpu
        && node.memory_bytes >= demand.memory_bytes
        && node.tcp_ports.is_disjoint(&demand.tcp_ports)
        && node.udp_ports.is_disjoint(&demand.udp_ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(cpu: u64, memory_mib: u64, tcp: &[u16], udp: &[u16]) -> NodeResources {
        NodeResources {
            node_id: "i-1".to_string(),
            cpu,
            memory_bytes: mib_to_bytes(memory_mib),
            tcp_ports: tcp.iter().copied().collect(),
            udp_ports: udp.iter().copied().collect(),
            task_count: 0,
            in_use: false,
        }
    }

    fn demand(cpu: u64, memory_mib: u64, tcp: &[u16], udp: &[u16]) -> WorkloadDemand {
        WorkloadDemand {
            cpu,
            memory_bytes: mib_to_bytes(memory_mib),
            tcp_ports: tcp.iter().copied().collect(),
            udp_ports: udp.iter().copied().collect(),
        }
    }

    #[test]
    fn fits_at_exact_capacity() {
        let n = node(500, 1024, &[], &[]);
        assert!(fits(&n, &demand(500, 1024, &[], &[])));
        assert!(!fits(&n, &demand(501, 1024, &[], &[])));
        assert!(!fits(&n, &demand(500, 1025, &[], &[])));
    }

    #[test]
    fn empty_demand_fits_anything() {
        assert!(fits(&node(0, 0, &[80], &[53]), &WorkloadDemand::default()));
    }

    #[test]
    fn port_conflicts_are_per_protocol() {
        let n = node(4096, 4096, &[80], &[53]);
        assert!(!fits(&n, &demand(0, 0, &[80], &[])));
        assert!(!fits(&n, &demand(0, 0, &[], &[53])));
        // Same number, other protocol.
        assert!(fits(&n, &demand(0, 0, &[53], &[80])));
    }

    #[test]
    fn claim_subtracts_and_marks_in_use() {
        let n = node(2048, 4096, &[22], &[]);
        let after = n.claim(&demand(512, 1024, &[8080], &[5000]));

        assert_eq!(after.cpu, 1536);
        assert_eq!(after.memory_bytes, mib_to_bytes(3072));
        assert!(after.tcp_ports.contains(&8080));
        assert!(after.udp_ports.contains(&5000));
        assert_eq!(after.task_count, 1);
        assert!(after.in_use);
        // The source snapshot is untouched.
        assert_eq!(n.cpu, 2048);
        assert!(!n.in_use);
    }
}
