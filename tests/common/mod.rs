//! Common test utilities for integration tests
//!
//! Provides a seeded in-memory cluster plus small simulated controllers
//! that reconcile it the way the real platform would.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use settle::domain::models::{
    ClusterAutoscaler, ClusterObject, ClusterOperator, ClusterResource, Config, DaemonSet,
    Deployment, Machine, MachineAutoscaler, MachineSet, Node, Notification, ObjectKind,
    ObjectMeta, ObjectRef, OperatorCondition, OwnerReference, MACHINE_ANNOTATION_KEY,
};
use settle::infrastructure::memory::InMemoryCluster;
use settle::scenarios::autoscaler::{
    AUTOSCALER_COMPONENT, AUTOSCALER_OBJECT_KIND, MAX_NODES_TOTAL_REACHED, SCALED_UP_GROUP,
    SCALE_DOWN_EMPTY, WORKLOAD_NAME, WORKLOAD_NAMESPACE,
};

pub const NAMESPACE: &str = "openshift-machine-api";
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
pub const WORKER_MACHINE_SET: &str = "workers";
const TICK: Duration = Duration::from_millis(20);

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Configuration with waits short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.waits.poll_interval_ms = 10;
    config.waits.short_timeout_secs = 2;
    config.waits.medium_timeout_secs = 5;
    config.waits.long_timeout_secs = 20;
    config
}

pub fn deployment(name: &str, replicas: i32) -> Deployment {
    Deployment {
        meta: ObjectMeta::named(name).in_namespace(NAMESPACE),
        replicas,
        available_replicas: replicas,
        spec: json!({
            "selector": { "matchLabels": { "k8s-app": name } },
            "template": { "spec": { "containers": [{ "name": name, "image": "registry/machine-api" }] } }
        }),
    }
}

pub fn daemon_set(name: &str) -> DaemonSet {
    DaemonSet {
        meta: ObjectMeta::named(name).in_namespace(NAMESPACE),
        desired_scheduled: 2,
        number_available: 2,
        spec: json!({
            "template": { "spec": { "nodeSelector": { "machine.openshift.io/interruptible-instance": "" } } }
        }),
    }
}

pub fn cluster_operator(name: &str, available: bool) -> ClusterOperator {
    ClusterOperator {
        meta: ObjectMeta::named(name),
        conditions: vec![
            OperatorCondition {
                condition_type: "Progressing".to_string(),
                status: "False".to_string(),
            },
            OperatorCondition {
                condition_type: "Available".to_string(),
                status: if available { "True" } else { "False" }.to_string(),
            },
        ],
    }
}

pub fn worker_machine_set(name: &str, replicas: i32) -> MachineSet {
    MachineSet {
        meta: ObjectMeta::named(name)
            .in_namespace(NAMESPACE)
            .with_label("machine.openshift.io/cluster-api-machine-role", "worker")
            .with_label("machine.openshift.io/cluster-api-cluster", "test-cluster"),
        replicas,
        selector: BTreeMap::from([(
            "machine.openshift.io/cluster-api-cluster".to_string(),
            "test-cluster".to_string(),
        )]),
        node_labels: BTreeMap::from([(WORKER_LABEL.to_string(), String::new())]),
        provider_spec: json!({ "value": { "instanceType": "m5.large" } }),
        ..MachineSet::default()
    }
}

/// Machine owned by `set` and the ready node backing it.
pub fn machine_with_node(set: &MachineSet, index: usize) -> (Machine, Node) {
    let name = format!("{}-{index}", set.meta.name);
    let namespace = set.meta.namespace.clone().unwrap_or_else(|| NAMESPACE.to_string());
    let machine = Machine {
        meta: ObjectMeta {
            owner_references: vec![OwnerReference {
                kind: "MachineSet".to_string(),
                name: set.meta.name.clone(),
                uid: set.meta.uid.clone(),
                controller: true,
            }],
            ..ObjectMeta::named(&name).in_namespace(&namespace)
        },
        node_ref: Some(name.clone()),
        phase: Some("Running".to_string()),
    };
    let mut node_meta = ObjectMeta::named(&name)
        .with_annotation(MACHINE_ANNOTATION_KEY, format!("{namespace}/{name}"));
    node_meta.labels = set.node_labels.clone();
    let node = Node {
        meta: node_meta,
        unschedulable: false,
        ready: true,
        memory_capacity: Some("16Gi".to_string()),
    };
    (machine, node)
}

/// A cluster with healthy machine API components and one worker machine
/// set of two machines.
pub fn healthy_cluster() -> Arc<InMemoryCluster> {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert(deployment("machine-api-operator", 1));
    cluster.insert(deployment("machine-api-controllers", 1));
    cluster.insert(daemon_set("machine-api-termination-handler"));
    cluster.insert(cluster_operator("machine-api", true));

    let set = cluster.insert(worker_machine_set(WORKER_MACHINE_SET, 2));
    let set = MachineSet::try_from(set).expect("machine set");
    for i in 0..2 {
        let (machine, node) = machine_with_node(&set, i);
        cluster.insert(machine);
        cluster.insert(node);
    }
    cluster
}

fn without_uid(object: &ClusterObject) -> ClusterObject {
    let mut object = object.clone();
    object.meta_mut().uid = None;
    object
}

/// Operator keeping `desired` objects in place: recreates them when
/// deleted and reverts any change.
pub fn spawn_operator(cluster: Arc<InMemoryCluster>, desired: Vec<ClusterObject>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK).await;
            for wanted in &desired {
                let current = cluster.object(&wanted.object_ref());
                let drifted = current.map_or(true, |c| without_uid(&c) != without_uid(wanted));
                if drifted {
                    let mut restored = wanted.clone();
                    restored.meta_mut().uid = None;
                    cluster.insert(restored);
                }
            }
        }
    })
}

/// Machine set controller: keeps each set at its replica count with ready
/// nodes, and removes nodes whose machine is gone.
pub fn spawn_machine_controller(cluster: Arc<InMemoryCluster>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK).await;
            reconcile_machines(&cluster);
        }
    })
}

fn typed<T: ClusterResource>(cluster: &InMemoryCluster) -> Vec<T> {
    cluster
        .objects_of(T::KIND)
        .into_iter()
        .filter_map(|o| T::try_from(o).ok())
        .collect()
}

fn reconcile_machines(cluster: &InMemoryCluster) {
    let machines: Vec<Machine> = typed(cluster);
    for set in typed::<MachineSet>(cluster) {
        let mut owned: Vec<&Machine> = machines
            .iter()
            .filter(|m| m.meta.is_controlled_by(ObjectKind::MachineSet, &set.meta))
            .collect();
        owned.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        let wanted = usize::try_from(set.replicas).unwrap_or(0);

        let mut index = 0;
        let mut count = owned.len();
        while count < wanted {
            let (machine, node) = machine_with_node(&set, index);
            index += 1;
            if cluster.contains(&machine.object_ref()) {
                continue;
            }
            cluster.insert(machine);
            cluster.insert(node);
            count += 1;
        }
        for extra in owned.iter().skip(wanted) {
            let _ = cluster.remove(&extra.object_ref());
        }
    }

    let machines: Vec<Machine> = typed(cluster);
    for node in typed::<Node>(cluster) {
        let Some(reference) = node.machine_annotation() else {
            continue;
        };
        let backed = machines
            .iter()
            .any(|m| format!("{}/{}", m.meta.namespace.as_deref().unwrap_or_default(), m.meta.name) == reference);
        if !backed {
            let _ = cluster.remove(&node.object_ref());
        }
    }
}

fn autoscaler_notification(reason: &str, message: String) -> Notification {
    Notification::builder(AUTOSCALER_COMPONENT)
        .reason(reason)
        .message(message)
        .involving(AUTOSCALER_OBJECT_KIND, "cluster-autoscaler-status")
        .in_namespace(NAMESPACE)
        .build()
}

/// Cluster autoscaler: while the workload exists, grows the autoscaled
/// machine sets up to the node cap and then keeps reporting the cap; once
/// the workload is gone, shrinks them back.
pub fn spawn_autoscaler(cluster: Arc<InMemoryCluster>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let workload = ObjectRef {
            kind: ObjectKind::Job,
            namespace: Some(WORKLOAD_NAMESPACE.to_string()),
            name: WORKLOAD_NAME.to_string(),
        };
        let mut scaled: Vec<ObjectRef> = Vec::new();
        loop {
            tokio::time::sleep(TICK).await;
            let Some(limits) = typed::<ClusterAutoscaler>(&cluster).into_iter().next() else {
                continue;
            };

            if cluster.contains(&workload) {
                // Desired size rather than live nodes, so a resize still in
                // flight counts against the cap.
                let desired: i32 = typed::<MachineSet>(&cluster).iter().map(|s| s.replicas).sum();
                let room = usize::try_from(limits.max_nodes_total - desired).unwrap_or(0);
                let targets: Vec<MachineAutoscaler> = typed(&cluster);
                let mut grown = 0;
                for target in &targets {
                    let set_ref = ObjectRef {
                        kind: ObjectKind::MachineSet,
                        namespace: target.meta.namespace.clone(),
                        name: target.target_name.clone(),
                    };
                    if grown >= room || scaled.contains(&set_ref) {
                        continue;
                    }
                    let max = target.max_replicas;
                    if cluster.modify(&set_ref, |o| {
                        if let ClusterObject::MachineSet(set) = o {
                            set.replicas = max;
                        }
                    }) {
                        let group = format!(
                            "{}/{}",
                            set_ref.namespace.as_deref().unwrap_or_default(),
                            set_ref.name
                        );
                        cluster.emit(autoscaler_notification(
                            SCALED_UP_GROUP,
                            format!("Scale-up: setting group {group} size to {max}"),
                        ));
                        scaled.push(set_ref);
                        grown += 1;
                    }
                }
                if grown == 0 && !scaled.is_empty() {
                    cluster.emit(autoscaler_notification(
                        MAX_NODES_TOTAL_REACHED,
                        format!("Max total nodes in cluster reached: {}", limits.max_nodes_total),
                    ));
                }
            } else {
                for set_ref in scaled.drain(..) {
                    let mut min = 1;
                    if let Some(target) = typed::<MachineAutoscaler>(&cluster)
                        .into_iter()
                        .find(|a| a.target_name == set_ref.name)
                    {
                        min = target.min_replicas;
                    }
                    cluster.modify(&set_ref, |o| {
                        if let ClusterObject::MachineSet(set) = o {
                            set.replicas = min;
                        }
                    });
                    cluster.emit(autoscaler_notification(
                        SCALE_DOWN_EMPTY,
                        format!("Scale-down: empty node {}-1 removed", set_ref.name),
                    ));
                }
            }
        }
    })
}
