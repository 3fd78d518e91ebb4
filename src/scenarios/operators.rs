//! Machine API operator reconciliation scenarios.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{Scenario, ScenarioContext, Suite, WaitBudget};
use crate::domain::errors::VerifyResult;
use crate::domain::models::{ClusterResource, DaemonSet, Deployment, PropagationPolicy};
use crate::domain::ports::{ClusterClient, ClusterClientExt};
use crate::services::probes;

pub const OPERATOR_DEPLOYMENT: &str = "machine-api-operator";
pub const CONTROLLERS_DEPLOYMENT: &str = "machine-api-controllers";
pub const TERMINATION_HANDLER: &str = "machine-api-termination-handler";
pub const CLUSTER_OPERATOR: &str = "machine-api";

pub fn scenarios() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(OperatorAvailable),
        Box::new(ControllersRecreated),
        Box::new(ControllersSpecMaintained),
        Box::new(TerminationHandlerReconciled),
        Box::new(ClusterOperatorAvailable),
    ]
}

async fn wait_deployment_available(ctx: &ScenarioContext, name: &str, budget: WaitBudget) -> Result<()> {
    let client = ctx.client();
    let namespace = ctx.namespace();
    ctx.waiter(format!("deployment {name} available"), budget)
        .eventually(|| probes::deployment_available(client, namespace, name))
        .await
        .with_context(|| format!("deployment {name:?} is not available"))
}

async fn wait_deployment_synced(ctx: &ScenarioContext, initial: &Deployment) -> Result<()> {
    let client = ctx.client();
    ctx.waiter(format!("deployment {} synced", initial.meta.name), WaitBudget::Medium)
        .eventually(|| probes::deployment_synced(client, initial))
        .await
        .with_context(|| format!("deployment {:?} spec was not restored", initial.meta.name))
}

async fn wait_daemon_set_available(ctx: &ScenarioContext, name: &str, budget: WaitBudget) -> Result<()> {
    let client = ctx.client();
    let namespace = ctx.namespace();
    ctx.waiter(format!("daemon set {name} available"), budget)
        .eventually(|| probes::daemon_set_available(client, namespace, name))
        .await
        .with_context(|| format!("daemon set {name:?} is not available"))
}

async fn wait_daemon_set_synced(ctx: &ScenarioContext, initial: &DaemonSet) -> Result<()> {
    let client = ctx.client();
    ctx.waiter(format!("daemon set {} synced", initial.meta.name), WaitBudget::Medium)
        .eventually(|| probes::daemon_set_synced(client, initial))
        .await
        .with_context(|| format!("daemon set {:?} spec was not restored", initial.meta.name))
}

async fn fetch_deployment(ctx: &ScenarioContext, name: &str) -> Result<Deployment> {
    let client = ctx.client();
    let namespace = ctx.namespace();
    ctx.waiter(format!("get deployment {name}"), WaitBudget::Short)
        .fetch(|| get_deployment(client, namespace, name))
        .await
        .with_context(|| format!("failed to get deployment {name:?}"))
}

async fn get_deployment(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> VerifyResult<Deployment> {
    Ok(client.get(Some(namespace), name).await?)
}

async fn get_daemon_set(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> VerifyResult<DaemonSet> {
    Ok(client.get(Some(namespace), name).await?)
}

/// The operator's own deployment is available.
pub struct OperatorAvailable;

#[async_trait]
impl Scenario for OperatorAvailable {
    fn name(&self) -> &'static str {
        "machine-api-operator deployment is available"
    }

    fn suite(&self) -> Suite {
        Suite::Operators
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        wait_deployment_available(ctx, OPERATOR_DEPLOYMENT, WaitBudget::Short).await
    }
}

/// Deleting the controllers deployment gets it recreated with the same spec.
pub struct ControllersRecreated;

#[async_trait]
impl Scenario for ControllersRecreated {
    fn name(&self) -> &'static str {
        "controllers deployment is reconciled after deletion"
    }

    fn suite(&self) -> Suite {
        Suite::Operators
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let initial = fetch_deployment(ctx, CONTROLLERS_DEPLOYMENT).await?;
        wait_deployment_available(ctx, CONTROLLERS_DEPLOYMENT, WaitBudget::Short).await?;

        tracing::info!(deployment = CONTROLLERS_DEPLOYMENT, "Deleting deployment");
        ctx.client()
            .delete_object(&initial.object_ref(), PropagationPolicy::Foreground)
            .await
            .context("failed to delete the controllers deployment")?;

        wait_deployment_available(ctx, CONTROLLERS_DEPLOYMENT, WaitBudget::Medium).await?;
        wait_deployment_synced(ctx, &initial).await
    }
}

/// Forcing the controllers deployment to zero replicas is reverted.
pub struct ControllersSpecMaintained;

#[async_trait]
impl Scenario for ControllersSpecMaintained {
    fn name(&self) -> &'static str {
        "controllers deployment spec is maintained"
    }

    fn suite(&self) -> Suite {
        Suite::Operators
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let initial = fetch_deployment(ctx, CONTROLLERS_DEPLOYMENT).await?;
        wait_deployment_available(ctx, CONTROLLERS_DEPLOYMENT, WaitBudget::Short).await?;

        let mut changed = initial.clone();
        changed.replicas = 0;
        tracing::info!(deployment = CONTROLLERS_DEPLOYMENT, "Scaling deployment to zero");
        ctx.client()
            .update(changed)
            .await
            .context("failed to update the controllers deployment")?;

        wait_deployment_synced(ctx, &initial).await?;
        wait_deployment_available(ctx, CONTROLLERS_DEPLOYMENT, WaitBudget::Medium).await
    }
}

/// The termination handler daemon set survives deletion and a bad update.
pub struct TerminationHandlerReconciled;

#[async_trait]
impl Scenario for TerminationHandlerReconciled {
    fn name(&self) -> &'static str {
        "termination handler daemon set is reconciled"
    }

    fn suite(&self) -> Suite {
        Suite::Operators
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let client = ctx.client();
        let namespace = ctx.namespace();
        let initial = ctx
            .waiter("get termination handler", WaitBudget::Short)
            .fetch(|| get_daemon_set(client, namespace, TERMINATION_HANDLER))
            .await
            .context("failed to get the termination handler daemon set")?;
        wait_daemon_set_available(ctx, TERMINATION_HANDLER, WaitBudget::Short).await?;

        tracing::info!(daemon_set = TERMINATION_HANDLER, "Deleting daemon set");
        client
            .delete_object(&initial.object_ref(), PropagationPolicy::Foreground)
            .await
            .context("failed to delete the termination handler daemon set")?;

        wait_daemon_set_available(ctx, TERMINATION_HANDLER, WaitBudget::Medium).await?;
        wait_daemon_set_synced(ctx, &initial).await?;

        let mut changed = ctx
            .waiter("get termination handler", WaitBudget::Short)
            .fetch(|| get_daemon_set(client, namespace, TERMINATION_HANDLER))
            .await?;
        let pod_spec = changed
            .spec
            .pointer_mut("/template/spec")
            .and_then(|s| s.as_object_mut())
            .context("daemon set has no pod template spec")?;
        pod_spec.insert("nodeSelector".to_string(), json!({ "badSelector": "" }));

        tracing::info!(daemon_set = TERMINATION_HANDLER, "Setting a bad node selector");
        client
            .update(changed)
            .await
            .context("failed to update the termination handler daemon set")?;

        wait_daemon_set_synced(ctx, &initial).await
    }
}

/// The `machine-api` cluster operator reports Available.
pub struct ClusterOperatorAvailable;

#[async_trait]
impl Scenario for ClusterOperatorAvailable {
    fn name(&self) -> &'static str {
        "machine-api cluster operator is available"
    }

    fn suite(&self) -> Suite {
        Suite::Operators
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let client = ctx.client();
        ctx.waiter("cluster operator available", WaitBudget::Short)
            .eventually(|| probes::cluster_operator_available(client, CLUSTER_OPERATOR))
            .await
            .context("cluster operator machine-api is not available")
    }
}
