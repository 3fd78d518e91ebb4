//! Worker machine set scaling.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Scenario, ScenarioContext, Suite, WaitBudget};
use crate::domain::models::LabelSelector;
use crate::services::probes;

pub fn scenarios() -> Vec<Box<dyn Scenario>> {
    vec![Box::new(ScaleWorkerMachineSet)]
}

async fn wait_one_machine_per_node(ctx: &ScenarioContext) -> Result<()> {
    let client = ctx.client();
    let namespace = ctx.namespace();
    ctx.waiter("one machine per node", WaitBudget::Medium)
        .eventually(|| probes::node_count_matches_machines(client, namespace))
        .await
        .context("nodes and machines do not match one to one")
}

async fn wait_group_size(ctx: &ScenarioContext, machine_set: &str, target: usize) -> Result<()> {
    let client = ctx.client();
    let namespace = ctx.namespace();
    ctx.waiter(format!("machine set {machine_set} at {target}"), WaitBudget::Long)
        .eventually(|| probes::group_scaled_to(client, namespace, machine_set, target))
        .await
        .with_context(|| format!("machine set {machine_set:?} did not reach {target} ready nodes"))
}

async fn wait_all_schedulable(ctx: &ScenarioContext) -> Result<()> {
    let client = ctx.client();
    let everything = LabelSelector::everything();
    let selector = &everything;
    ctx.waiter("all nodes schedulable", WaitBudget::Short)
        .eventually(|| probes::all_nodes_schedulable(client, selector))
        .await
        .context("some nodes stayed unschedulable")
}

fn replica_target(replicas: i32) -> Result<usize> {
    usize::try_from(replicas).with_context(|| format!("invalid replica count {replicas}"))
}

/// Scale the machine set behind a worker node up by one and back.
pub struct ScaleWorkerMachineSet;

impl ScaleWorkerMachineSet {
    async fn scale_and_verify(&self, ctx: &ScenarioContext, name: &str, initial: i32) -> Result<()> {
        let queries = ctx.queries();
        let target = initial + 1;

        queries.scale_machine_set(name, target).await?;
        wait_group_size(ctx, name, replica_target(target)?).await?;
        wait_all_schedulable(ctx).await?;
        wait_one_machine_per_node(ctx).await?;

        queries.scale_machine_set(name, initial).await?;
        wait_group_size(ctx, name, replica_target(initial)?).await?;
        wait_one_machine_per_node(ctx).await
    }
}

#[async_trait]
impl Scenario for ScaleWorkerMachineSet {
    fn name(&self) -> &'static str {
        "scale a worker machine set"
    }

    fn suite(&self) -> Suite {
        Suite::Infra
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        wait_one_machine_per_node(ctx).await?;

        let queries = ctx.queries();
        let size = queries.cluster_size().await?;
        let node = queries.worker_node().await?;
        let machine = queries.machine_from_node(&node).await?;
        let machine_set = queries.machine_set_of(&machine).await?;
        let name = machine_set.meta.name.clone();
        tracing::info!(
            size,
            node = %node.meta.name,
            machine = %machine.meta.name,
            machine_set = %name,
            "Found worker machine set"
        );

        let outcome = self.scale_and_verify(ctx, &name, machine_set.replicas).await;
        if outcome.is_err() {
            if let Err(e) = queries.scale_machine_set(&name, machine_set.replicas).await {
                tracing::warn!(machine_set = %name, error = %e, "Failed to restore replicas");
            }
        }
        queries.log_machine_sets_snapshot().await?;
        outcome
    }
}
