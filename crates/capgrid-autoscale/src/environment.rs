//! Environment scaler — a full bin-packing pass over one environment.
//!
//! Unlike the cluster scaler, this packs demand into nodes *with*
//! subtraction, adds estimated nodes as needed, and then sizes the group
//! to exactly the nodes that ended up in use, terminating idle ones.
//!
//! With a node waiter attached, a run that grew the group also waits for
//! the new nodes to register before it reports back.

use std::sync::Arc;

use capgrid_core::Waiter;
use capgrid_placement::{NodeResources, ResourceManager, fits};
use capgrid_provider::WorkloadRegistry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::demand::{CopyScope, DemandCache, collect_pending_demand};
use crate::error::{ScaleError, ScaleResult};

/// Report of one environment scaler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerRunInfo {
    pub environment_id: String,
    pub pending_demand: usize,
    /// Node snapshots after packing, including estimated new nodes.
    pub nodes: Vec<NodeResources>,
    pub scale_before_run: usize,
    pub desired_scale_after_run: u32,
    /// 0 when the scale call itself failed.
    pub actual_scale_after_run: u32,
    pub unused_nodes: usize,
    /// Demand that fits on no node at all, a failed scale call, or new
    /// nodes that never registered.
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct EnvironmentScaler {
    resources: ResourceManager,
    registry: Arc<dyn WorkloadRegistry>,
    node_waiter: Option<Waiter>,
}

impl EnvironmentScaler {
    pub fn new(resources: ResourceManager, registry: Arc<dyn WorkloadRegistry>) -> Self {
        Self {
            resources,
            registry,
            node_waiter: None,
        }
    }

    /// Wait for new nodes to become active after every scale-up.
    pub fn with_node_waiter(mut self, waiter: Waiter) -> Self {
        self.node_waiter = Some(waiter);
        self
    }

    pub async fn run(&self, environment_id: &str) -> ScaleResult<ScalerRunInfo> {
        let orchestration = self.resources.orchestration().as_ref();
        let mut nodes = self.resources.list_node_resources(environment_id).await?;
        let scale_before_run = nodes.len();

        let pending = collect_pending_demand(
            orchestration,
            self.registry.as_ref(),
            environment_id,
            CopyScope::Environment,
        )
        .await?;

        let mut cache = DemandCache::default();
        let mut new_node: Option<NodeResources> = None;
        let mut errors = Vec::new();

        for task_definition in &pending.units {
            let demand = cache.get(orchestration, task_definition).await?;

            // In-use nodes first, then the tightest fit by memory.
            nodes.sort_by_key(|n| (!n.in_use, n.memory_bytes));

            if let Some(node) = nodes.iter_mut().find(|n| fits(n, &demand)) {
                *node = node.claim(&demand);
                continue;
            }

            let template = match &new_node {
                Some(template) => template.clone(),
                None => {
                    let estimate = self.resources.estimate_new_node_resources(environment_id).await?;
                    new_node = Some(estimate.clone());
                    estimate
                }
            };

            if !fits(&template, &demand) {
                let err = ScaleError::IncompatibleDemand {
                    environment: environment_id.to_string(),
                    task_definition: task_definition.clone(),
                };
                warn!(environment = %environment_id, %task_definition, "demand does not fit a new node");
                errors.push(err.to_string());
                continue;
            }

            let mut added = template.claim(&demand);
            added.node_id = format!("{}-{}", template.node_id, nodes.len() + 1);
            nodes.push(added);
        }

        let unused: Vec<NodeResources> = nodes.iter().filter(|n| !n.in_use).cloned().collect();
        let desired = (nodes.len() - unused.len()) as u32;
        let actual = match self.resources.scale_to(environment_id, desired, &unused).await {
            Ok(actual) => actual,
            Err(e) => {
                warn!(environment = %environment_id, desired, error = %e, "scaling the group failed");
                errors.push(ScaleError::from(e).to_string());
                0
            }
        };

        if let Some(waiter) = &self.node_waiter
            && actual as usize > scale_before_run
            && let Err(e) = self
                .resources
                .wait_for_active_nodes(environment_id, actual as usize, waiter)
                .await
        {
            warn!(environment = %environment_id, expected = actual, error = %e, "new nodes did not register");
            errors.push(ScaleError::from(e).to_string());
        }

        info!(
            environment = %environment_id,
            pending = pending.units.len(),
            before = scale_before_run,
            desired,
            actual,
            unused = unused.len(),
            "environment scaler run finished"
        );

        Ok(ScalerRunInfo {
            environment_id: environment_id.to_string(),
            pending_demand: pending.units.len(),
            nodes,
            scale_before_run,
            desired_scale_after_run: desired,
            actual_scale_after_run: actual,
            unused_nodes: unused.len(),
            errors,
        })
    }
}
