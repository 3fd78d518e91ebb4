//! Reconciliation probes.
//!
//! Each probe reads the platform once and answers "converged yet?". They are
//! meant to be driven by a [`ConvergenceWaiter`](super::ConvergenceWaiter):
//! `Ok(false)` keeps polling, transient client errors are retried and
//! `FatalConfiguration` aborts.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::errors::{ClientError, VerifyError, VerifyResult};
use crate::domain::models::{
    ClusterOperator, DaemonSet, Deployment, LabelSelector, Machine, MachineSet, Node, ObjectKind,
    ObjectRef, Pod,
};
use crate::domain::ports::{ClusterClient, ClusterClientExt};

/// Split a `namespace/name` machine reference.
pub fn parse_machine_reference(reference: &str) -> VerifyResult<(&str, &str)> {
    match reference.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(VerifyError::fatal(format!(
            "malformed machine reference {reference:?}, expected namespace/name"
        ))),
    }
}

/// Every node maps to exactly one machine in `namespace` and back.
///
/// Nodes point at their machine through an annotation, machines at their
/// node through `nodeRef`. Any gap means the platform has not caught up yet;
/// a malformed annotation is fatal.
pub async fn node_count_matches_machines(
    client: &dyn ClusterClient,
    namespace: &str,
) -> VerifyResult<bool> {
    let machines: Vec<Machine> = client.list(Some(namespace), &LabelSelector::everything()).await?;
    let nodes: Vec<Node> = client.list(None, &LabelSelector::everything()).await?;

    tracing::info!(
        nodes = nodes.len(),
        machines = machines.len(),
        "Expecting the same number of machines and nodes"
    );
    if nodes.len() != machines.len() {
        return Ok(false);
    }

    let mut node_to_machine = HashMap::with_capacity(nodes.len());
    for node in &nodes {
        let Some(reference) = node.machine_annotation() else {
            tracing::warn!(node = %node.meta.name, "Node has no machine annotation yet");
            return Ok(false);
        };
        let (ns, machine) = parse_machine_reference(reference)?;
        node_to_machine.insert(node.meta.name.as_str(), (ns, machine));
    }

    for machine in &machines {
        let Some(node_name) = machine.node_ref.as_deref() else {
            tracing::warn!(machine = %machine.meta.name, "Machine has no nodeRef yet");
            return Ok(false);
        };
        match node_to_machine.get(node_name) {
            Some((ns, name)) if *ns == namespace && *name == machine.meta.name => {
                tracing::debug!(machine = %machine.meta.name, node = node_name, "Machine is linked to node");
            }
            _ => {
                tracing::warn!(
                    machine = %machine.meta.name,
                    node = node_name,
                    "Node does not point back at machine"
                );
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// No node matching `selector` is cordoned.
pub async fn all_nodes_schedulable(
    client: &dyn ClusterClient,
    selector: &LabelSelector,
) -> VerifyResult<bool> {
    let nodes: Vec<Node> = client.list(None, selector).await?;
    for node in &nodes {
        if node.unschedulable {
            tracing::warn!(node = %node.meta.name, "Node is unschedulable");
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn nodes_ready(nodes: &[Node]) -> bool {
    nodes.iter().all(|n| {
        if !n.ready {
            tracing::warn!(node = %n.meta.name, "Node is not ready");
        }
        n.ready
    })
}

/// The machine set owns exactly `target` machines, each backed by a live,
/// ready node.
pub async fn group_scaled_to(
    client: &dyn ClusterClient,
    namespace: &str,
    machine_set: &str,
    target: usize,
) -> VerifyResult<bool> {
    let set: MachineSet = client.get(Some(namespace), machine_set).await?;
    let machines: Vec<Machine> = client.list(Some(namespace), &LabelSelector::everything()).await?;
    let owned: Vec<&Machine> = machines
        .iter()
        .filter(|m| m.meta.is_controlled_by(ObjectKind::MachineSet, &set.meta))
        .collect();

    if owned.len() != target {
        tracing::info!(machine_set, owned = owned.len(), target, "Machine set not at target size");
        return Ok(false);
    }

    let mut nodes = Vec::with_capacity(owned.len());
    for machine in owned {
        let Some(node_name) = machine.node_ref.as_deref() else {
            return Ok(false);
        };
        match client.get::<Node>(None, node_name).await {
            Ok(node) => nodes.push(node),
            Err(ClientError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(nodes_ready(&nodes))
}

pub async fn deployment_available(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> VerifyResult<bool> {
    let deployment: Deployment = client.get(Some(namespace), name).await?;
    if !deployment.is_available() {
        tracing::info!(
            deployment = name,
            replicas = deployment.replicas,
            available = deployment.available_replicas,
            "Deployment is not available yet"
        );
    }
    Ok(deployment.is_available())
}

/// The live deployment has the same replica count and spec as `initial`.
pub async fn deployment_synced(
    client: &dyn ClusterClient,
    initial: &Deployment,
) -> VerifyResult<bool> {
    let current: Deployment = client
        .get(initial.meta.namespace.as_deref(), &initial.meta.name)
        .await?;
    Ok(current.replicas == initial.replicas && specs_match(&current.spec, &initial.spec))
}

pub async fn daemon_set_available(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> VerifyResult<bool> {
    let daemon_set: DaemonSet = client.get(Some(namespace), name).await?;
    Ok(daemon_set.is_available())
}

pub async fn daemon_set_synced(client: &dyn ClusterClient, initial: &DaemonSet) -> VerifyResult<bool> {
    let current: DaemonSet = client
        .get(initial.meta.namespace.as_deref(), &initial.meta.name)
        .await?;
    Ok(specs_match(&current.spec, &initial.spec))
}

fn specs_match(current: &Value, initial: &Value) -> bool {
    if current != initial {
        tracing::debug!(%current, %initial, "Spec differs from the initial one");
        return false;
    }
    true
}

pub async fn cluster_operator_available(client: &dyn ClusterClient, name: &str) -> VerifyResult<bool> {
    let operator: ClusterOperator = client.get(None, name).await?;
    Ok(operator.is_available())
}

/// The object is gone. Other read errors are returned for the waiter to classify.
pub async fn object_deleted(client: &dyn ClusterClient, target: &ObjectRef) -> VerifyResult<bool> {
    match client
        .get_object(target.kind, target.namespace.as_deref(), &target.name)
        .await
    {
        Ok(_) => Ok(false),
        Err(ClientError::NotFound { .. }) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// No pod in `namespace` has a name starting with `prefix`.
pub async fn no_pods_with_prefix(
    client: &dyn ClusterClient,
    namespace: &str,
    prefix: &str,
) -> VerifyResult<bool> {
    let pods: Vec<Pod> = client.list(Some(namespace), &LabelSelector::everything()).await?;
    let remaining = pods.iter().filter(|p| p.meta.name.starts_with(prefix)).count();
    if remaining > 0 {
        tracing::info!(remaining, prefix, "Workload pods still present");
    }
    Ok(remaining == 0)
}
