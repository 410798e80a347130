//! Simulation mode — runs the control plane against an in-memory cloud.
//!
//! Environments are seeded from `--environment` flags. A fleet loop plays
//! the part of the autoscaling service: whenever a group's desired
//! capacity exceeds its members, it launches fresh nodes into the group
//! and registers them with the cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use capgrid_placement::instance_spec;
use capgrid_placement::instance_types::CPU_UNITS_PER_VCPU;
use capgrid_provider::{ContainerInstance, MemoryCloud};
use tokio::sync::watch;
use tracing::{debug, info};

/// One `--environment name=min:max:instance_type` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSeed {
    pub name: String,
    pub min: u32,
    pub max: u32,
    pub instance_type: String,
}

impl EnvironmentSeed {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let (name, rest) = raw
            .split_once('=')
            .with_context(|| format!("environment {raw:?} must look like name=min:max:instance_type"))?;
        let parts: Vec<&str> = rest.split(':').collect();
        let [min, max, instance_type] = parts.as_slice() else {
            bail!("environment {raw:?} must look like name=min:max:instance_type");
        };

        let seed = Self {
            name: name.trim().to_string(),
            min: min.parse().with_context(|| format!("invalid min in {raw:?}"))?,
            max: max.parse().with_context(|| format!("invalid max in {raw:?}"))?,
            instance_type: instance_type.to_string(),
        };

        if seed.name.is_empty() {
            bail!("environment {raw:?} has an empty name");
        }
        if seed.min > seed.max {
            bail!("environment {} has min {} above max {}", seed.name, seed.min, seed.max);
        }
        if instance_spec(&seed.instance_type).is_none() {
            bail!("environment {} uses unknown instance type {}", seed.name, seed.instance_type);
        }
        Ok(seed)
    }
}

pub struct SimulatedFleet {
    cloud: MemoryCloud,
    seeds: Vec<EnvironmentSeed>,
    reserved_ports: Vec<u16>,
    next_node: AtomicU64,
}

impl SimulatedFleet {
    pub fn new(cloud: MemoryCloud, seeds: Vec<EnvironmentSeed>, reserved_ports: Vec<u16>) -> Self {
        for seed in &seeds {
            cloud.add_environment(&seed.name, seed.min, seed.max, &seed.instance_type);
        }
        Self {
            cloud,
            seeds,
            reserved_ports,
            next_node: AtomicU64::new(1),
        }
    }

    /// Launch nodes until every group has as many members as it wants.
    /// Returns how many were launched.
    pub fn reconcile(&self) -> usize {
        let mut launched = 0;
        for seed in &self.seeds {
            let Some(group) = self.cloud.group(&seed.name) else {
                continue;
            };
            let Some(spec) = instance_spec(&seed.instance_type) else {
                continue;
            };

            let missing = (group.desired_capacity as usize).saturating_sub(group.instances.len());
            for _ in 0..missing {
                let id = format!("i-{:06}", self.next_node.fetch_add(1, Ordering::Relaxed));
                let node = ContainerInstance::new(&id)
                    .with_remaining((spec.vcpus * CPU_UNITS_PER_VCPU) as i64, spec.memory_mib as i64)
                    .with_tcp_ports(&self.reserved_ports);
                self.cloud.put_container_instance(&seed.name, node);
                info!(environment = %seed.name, node = %id, "simulated node launched");
                launched += 1;
            }
        }
        launched
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), environments = self.seeds.len(), "simulated fleet started");

        loop {
            let launched = self.reconcile();
            debug!(launched, "simulated fleet reconciled");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("simulated fleet shutting down");
                    break;
                }
            }
        }
    }
}
