//! Pending demand — the work an environment still needs room for.
//!
//! Demand comes from two places: services whose primary deployment is short
//! of its desired count, and one-off copies parked in the workload
//! registry waiting on capacity.

use std::collections::HashMap;

use capgrid_placement::{WorkloadDemand, task_definition_to_demand};
use capgrid_provider::{OrchestrationApi, ProviderResult, TaskDefinitionId, WorkloadRegistry};
use tracing::debug;

/// Which one-off copies count towards an environment's demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyScope {
    /// Every capacity-waiting copy in the fleet.
    FleetWide,
    /// Only copies that belong to the environment.
    Environment,
}

#[derive(Debug, Default)]
pub struct PendingDemand {
    /// One entry per copy still to be placed.
    pub units: Vec<TaskDefinitionId>,
    /// A service is short or a copy is waiting on capacity.
    pub unplaceable: bool,
    /// A one-off copy reports a container still `PENDING`.
    pub pending: bool,
}

pub async fn collect_pending_demand(
    orchestration: &dyn OrchestrationApi,
    registry: &dyn WorkloadRegistry,
    environment_id: &str,
    scope: CopyScope,
) -> ProviderResult<PendingDemand> {
    let mut demand = PendingDemand::default();

    let service_arns = orchestration.list_services(environment_id).await?;
    if !service_arns.is_empty() {
        for service in orchestration.describe_services(environment_id, &service_arns).await? {
            for deployment in service.deployments.iter().filter(|d| d.is_primary()) {
                let shortfall = deployment.shortfall();
                if shortfall == 0 {
                    continue;
                }
                debug!(
                    environment = %environment_id,
                    service = %service.name,
                    shortfall,
                    "service deployment is short of its desired count"
                );
                demand.unplaceable = true;
                for _ in 0..shortfall {
                    demand.units.push(deployment.task_definition.clone());
                }
            }
        }
    }

    for task in registry.list_tasks().await? {
        if scope == CopyScope::Environment && task.environment_id != environment_id {
            continue;
        }
        for copy in &task.copies {
            if copy.is_waiting_on_capacity() {
                demand.unplaceable = true;
                demand.units.push(task.task_definition.clone());
            }
            if copy.has_pending_container() {
                demand.pending = true;
            }
        }
    }

    Ok(demand)
}

/// Resolves each task definition at most once.
#[derive(Default)]
pub struct DemandCache {
    resolved: HashMap<TaskDefinitionId, WorkloadDemand>,
}

impl DemandCache {
    pub async fn get(
        &mut self,
        orchestration: &dyn OrchestrationApi,
        task_definition: &str,
    ) -> ProviderResult<WorkloadDemand> {
        if let Some(demand) = self.resolved.get(task_definition) {
            return Ok(demand.clone());
        }
        let definition = orchestration.describe_task_definition(task_definition).await?;
        let demand = task_definition_to_demand(&definition);
        self.resolved.insert(task_definition.to_string(), demand.clone());
        Ok(demand)
    }
}
