//! Retrying reads of cluster state.
//!
//! Every query goes through a [`ConvergenceWaiter`] so that a flaky API
//! server costs a few retries instead of a failed scenario.

use std::sync::Arc;

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{
    ClusterConfig, LabelSelector, Machine, MachineSet, Node, ObjectKind,
};
use crate::domain::ports::{ClusterClient, ClusterClientExt};

use super::convergence::ConvergenceWaiter;
use super::probes::parse_machine_reference;

pub struct ClusterQueries {
    client: Arc<dyn ClusterClient>,
    cluster: ClusterConfig,
    waiter: ConvergenceWaiter,
}

impl ClusterQueries {
    pub fn new(client: Arc<dyn ClusterClient>, cluster: ClusterConfig, waiter: ConvergenceWaiter) -> Self {
        Self {
            client,
            cluster,
            waiter,
        }
    }

    fn namespace(&self) -> &str {
        &self.cluster.machine_api_namespace
    }

    async fn fetch_nodes(&self, selector: LabelSelector) -> VerifyResult<Vec<Node>> {
        let client = &self.client;
        let selector = &selector;
        self.waiter
            .fetch(|| async move {
                client
                    .list::<Node>(None, selector)
                    .await
                    .map_err(VerifyError::from)
            })
            .await
    }

    /// Number of nodes in the cluster.
    pub async fn cluster_size(&self) -> VerifyResult<usize> {
        let size = self.fetch_nodes(LabelSelector::everything()).await?.len();
        tracing::info!(size, "Cluster size");
        Ok(size)
    }

    /// First node carrying the worker role label.
    pub async fn worker_node(&self) -> VerifyResult<Node> {
        let client = &self.client;
        let selector = LabelSelector::everything().with(self.cluster.worker_node_label.clone(), "");
        let selector = &selector;
        let nodes = self
            .waiter
            .eventually_value(
                || async move {
                    client
                        .list::<Node>(None, selector)
                        .await
                        .map_err(VerifyError::from)
                },
                |nodes: &Vec<Node>| !nodes.is_empty(),
            )
            .await?;
        nodes
            .into_iter()
            .next()
            .ok_or_else(|| VerifyError::transient("no worker nodes found"))
    }

    /// Machine backing `node`, found through the node's machine annotation.
    pub async fn machine_from_node(&self, node: &Node) -> VerifyResult<Machine> {
        let reference = node.machine_annotation().ok_or_else(|| {
            VerifyError::fatal(format!("node {:?} has no machine annotation", node.meta.name))
        })?;
        let (namespace, name) = parse_machine_reference(reference)?;
        let client = &self.client;
        self.waiter
            .fetch(|| async move {
                client
                    .get::<Machine>(Some(namespace), name)
                    .await
                    .map_err(VerifyError::from)
            })
            .await
    }

    /// Machine set that owns `machine`.
    pub async fn machine_set_of(&self, machine: &Machine) -> VerifyResult<MachineSet> {
        let owner = machine
            .meta
            .owner_references
            .iter()
            .find(|r| r.kind == ObjectKind::MachineSet.as_str())
            .ok_or_else(|| {
                VerifyError::fatal(format!("no machine set owns machine {:?}", machine.meta.name))
            })?;
        self.machine_set(&owner.name).await
    }

    pub async fn machine_set(&self, name: &str) -> VerifyResult<MachineSet> {
        let client = &self.client;
        let namespace = self.namespace();
        self.waiter
            .fetch(|| async move {
                client
                    .get::<MachineSet>(Some(namespace), name)
                    .await
                    .map_err(VerifyError::from)
            })
            .await
    }

    pub async fn machine_sets(&self) -> VerifyResult<Vec<MachineSet>> {
        self.fetch_machine_sets(LabelSelector::everything()).await
    }

    /// Machine sets whose machines take the worker role.
    pub async fn worker_machine_sets(&self) -> VerifyResult<Vec<MachineSet>> {
        self.fetch_machine_sets(
            LabelSelector::everything().with(self.cluster.worker_machine_label.clone(), "worker"),
        )
        .await
    }

    async fn fetch_machine_sets(&self, selector: LabelSelector) -> VerifyResult<Vec<MachineSet>> {
        let client = &self.client;
        let namespace = self.namespace();
        let selector = &selector;
        self.waiter
            .fetch(|| async move {
                client
                    .list::<MachineSet>(Some(namespace), selector)
                    .await
                    .map_err(VerifyError::from)
            })
            .await
    }

    pub async fn machines(&self) -> VerifyResult<Vec<Machine>> {
        let client = &self.client;
        let namespace = self.namespace();
        self.waiter
            .fetch(|| async move {
                client
                    .list::<Machine>(Some(namespace), &LabelSelector::everything())
                    .await
                    .map_err(VerifyError::from)
            })
            .await
    }

    /// Machines controlled by `machine_set`.
    pub async fn machines_of(&self, machine_set: &MachineSet) -> VerifyResult<Vec<Machine>> {
        Ok(self
            .machines()
            .await?
            .into_iter()
            .filter(|m| m.meta.is_controlled_by(ObjectKind::MachineSet, &machine_set.meta))
            .collect())
    }

    /// Nodes backing the machines of `machine_set`. Machines without a node
    /// yet are skipped.
    pub async fn nodes_of(&self, machine_set: &MachineSet) -> VerifyResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for machine in self.machines_of(machine_set).await? {
            if let Some(node_name) = machine.node_ref.as_deref() {
                nodes.push(self.client.get::<Node>(None, node_name).await?);
            }
        }
        Ok(nodes)
    }

    /// Set the replica count of a machine set, retrying on conflicts.
    pub async fn scale_machine_set(&self, name: &str, replicas: i32) -> VerifyResult<()> {
        let client = &self.client;
        let namespace = self.namespace();
        let original = self
            .waiter
            .fetch(|| set_replicas(client.as_ref(), namespace, name, replicas))
            .await?;
        tracing::info!(machine_set = name, original, replicas, "Scaled machine set");
        Ok(())
    }

    /// Log replica counts of every machine set.
    pub async fn log_machine_sets_snapshot(&self) -> VerifyResult<()> {
        for set in self.machine_sets().await? {
            tracing::info!(
                machine_set = %set.meta.name,
                replicas = set.replicas,
                ready = set.ready_replicas,
                available = set.available_replicas,
                "Machine set snapshot"
            );
        }
        Ok(())
    }
}

/// Returns the replica count before the update.
async fn set_replicas(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    replicas: i32,
) -> VerifyResult<i32> {
    let mut set: MachineSet = client.get(Some(namespace), name).await?;
    let original = set.replicas;
    set.replicas = replicas;
    client.update(set).await?;
    Ok(original)
}
