//! Cluster scaler — decides whether an environment needs more nodes.
//!
//! Every unit of pending demand, plus the caller's new workload, is checked
//! against the *same* snapshot of node capacity. Units are never subtracted
//! from the snapshot as they are counted, so the estimate is pessimistic
//! only about what fits nowhere, never about what fits somewhere.

use std::sync::Arc;

use capgrid_placement::{ResourceManager, fits};
use capgrid_provider::{GroupSizeUpdate, WorkloadRegistry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::demand::{CopyScope, DemandCache, collect_pending_demand};
use crate::error::ScaleResult;

/// What a scaling pass found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingOutcome {
    /// Nodes requested on top of the group's previous desired capacity.
    pub nodes_added: u32,
    /// Some demand fit no current node, a copy is waiting on capacity, or
    /// a service is short of its desired count.
    pub unplaceable_work: bool,
    /// A one-off copy is still starting.
    pub pending_work: bool,
}

impl ScalingOutcome {
    /// Whether the environment is still settling. Scale-down must wait.
    pub fn has_unallocated_work(&self) -> bool {
        self.unplaceable_work || self.pending_work
    }
}

#[derive(Clone)]
pub struct ClusterScaler {
    resources: ResourceManager,
    registry: Arc<dyn WorkloadRegistry>,
}

impl ClusterScaler {
    pub fn new(resources: ResourceManager, registry: Arc<dyn WorkloadRegistry>) -> Self {
        Self {
            resources,
            registry,
        }
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Count the nodes the environment is missing and grow its group to
    /// cover them.
    ///
    /// `new_workload` is a task definition about to be run `count` times;
    /// pass `None` to only account for work already in flight.
    pub async fn trigger_scaling_algorithm(
        &self,
        environment_id: &str,
        new_workload: Option<&str>,
        count: u32,
    ) -> ScaleResult<ScalingOutcome> {
        let orchestration = self.resources.orchestration().as_ref();
        let nodes = self.resources.list_node_resources(environment_id).await?;

        let pending = collect_pending_demand(
            orchestration,
            self.registry.as_ref(),
            environment_id,
            CopyScope::FleetWide,
        )
        .await?;

        let mut outcome = ScalingOutcome {
            nodes_added: 0,
            unplaceable_work: pending.unplaceable,
            pending_work: pending.pending,
        };

        let mut units = pending.units;
        if let Some(task_definition) = new_workload {
            units.extend((0..count).map(|_| task_definition.to_string()));
        }

        let mut cache = DemandCache::default();
        let mut additional: u32 = 0;
        for task_definition in &units {
            let demand = cache.get(orchestration, task_definition).await?;
            if !nodes.iter().any(|node| fits(node, &demand)) {
                debug!(environment = %environment_id, %task_definition, "demand fits no current node");
                outcome.unplaceable_work = true;
                additional += 1;
            }
        }

        if additional == 0 {
            return Ok(outcome);
        }

        let fleet = self.resources.fleet();
        let group = fleet.describe_auto_scaling_group(environment_id).await?;
        let total = additional + nodes.len() as u32;
        if total > group.desired_capacity {
            info!(
                environment = %environment_id,
                current_nodes = nodes.len(),
                additional,
                from = group.desired_capacity,
                to = total,
                "scaling cluster up for unplaceable work"
            );
            fleet
                .update_auto_scaling_group(
                    environment_id,
                    GroupSizeUpdate {
                        min_size: None,
                        max_size: Some(total.max(group.max_size)),
                        desired_capacity: Some(total),
                    },
                )
                .await?;
            outcome.nodes_added = total - group.desired_capacity;
        }

        Ok(outcome)
    }
}
