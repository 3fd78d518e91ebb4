//! Reconciliation probes and cluster queries against a seeded in-memory
//! cluster.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{healthy_cluster, NAMESPACE, WORKER_LABEL, WORKER_MACHINE_SET};
use settle::domain::models::{
    ClusterConfig, ClusterObject, ClusterResource, Deployment, LabelSelector, Machine, MachineSet,
    Node, ObjectKind, ObjectRef, Pod, PropagationPolicy, MACHINE_ANNOTATION_KEY,
};
use settle::domain::ports::{ClusterClient, ClusterClientExt};
use settle::infrastructure::memory::InMemoryCluster;
use settle::services::{probes, ClusterQueries, ConvergenceWaiter};
use settle::{ClientError, VerifyError};

fn node_ref(name: &str) -> ObjectRef {
    ObjectRef {
        kind: ObjectKind::Node,
        namespace: None,
        name: name.to_string(),
    }
}

fn queries(cluster: &Arc<InMemoryCluster>) -> ClusterQueries {
    ClusterQueries::new(
        cluster.clone(),
        ClusterConfig::default(),
        ConvergenceWaiter::new(Duration::from_millis(5), Duration::from_secs(1)),
    )
}

#[tokio::test]
async fn test_healthy_cluster_has_one_machine_per_node() {
    common::setup_test_logging();
    let cluster = healthy_cluster();
    assert!(probes::node_count_matches_machines(cluster.as_ref(), NAMESPACE).await.unwrap());
}

#[tokio::test]
async fn test_extra_node_is_not_converged() {
    let cluster = healthy_cluster();
    cluster.insert(Node {
        meta: settle::domain::models::ObjectMeta::named("stray"),
        ready: true,
        ..Node::default()
    });
    assert!(!probes::node_count_matches_machines(cluster.as_ref(), NAMESPACE).await.unwrap());
}

#[tokio::test]
async fn test_missing_annotation_is_not_converged_but_malformed_is_fatal() {
    let cluster = healthy_cluster();
    let target = node_ref(&format!("{WORKER_MACHINE_SET}-0"));

    cluster.modify(&target, |o| {
        o.meta_mut().annotations.remove(MACHINE_ANNOTATION_KEY);
    });
    assert!(!probes::node_count_matches_machines(cluster.as_ref(), NAMESPACE).await.unwrap());

    cluster.modify(&target, |o| {
        o.meta_mut()
            .annotations
            .insert(MACHINE_ANNOTATION_KEY.to_string(), "no-slash-here".to_string());
    });
    let err = probes::node_count_matches_machines(cluster.as_ref(), NAMESPACE)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::FatalConfiguration(_)));
}

#[tokio::test]
async fn test_node_pointing_at_wrong_machine() {
    let cluster = healthy_cluster();
    cluster.modify(&node_ref(&format!("{WORKER_MACHINE_SET}-0")), |o| {
        o.meta_mut().annotations.insert(
            MACHINE_ANNOTATION_KEY.to_string(),
            format!("{NAMESPACE}/{WORKER_MACHINE_SET}-1"),
        );
    });
    assert!(!probes::node_count_matches_machines(cluster.as_ref(), NAMESPACE).await.unwrap());
}

#[tokio::test]
async fn test_cordoned_node_is_not_schedulable() {
    let cluster = healthy_cluster();
    let workers = LabelSelector::everything().with(WORKER_LABEL, "");
    assert!(probes::all_nodes_schedulable(cluster.as_ref(), &workers).await.unwrap());

    cluster.modify(&node_ref(&format!("{WORKER_MACHINE_SET}-1")), |o| {
        if let ClusterObject::Node(node) = o {
            node.unschedulable = true;
        }
    });
    assert!(!probes::all_nodes_schedulable(cluster.as_ref(), &workers).await.unwrap());
}

#[tokio::test]
async fn test_group_scaled_to_requires_ready_nodes() {
    let cluster = healthy_cluster();
    let client = cluster.as_ref();
    assert!(probes::group_scaled_to(client, NAMESPACE, WORKER_MACHINE_SET, 2).await.unwrap());
    assert!(!probes::group_scaled_to(client, NAMESPACE, WORKER_MACHINE_SET, 3).await.unwrap());

    cluster.modify(&node_ref(&format!("{WORKER_MACHINE_SET}-0")), |o| {
        if let ClusterObject::Node(node) = o {
            node.ready = false;
        }
    });
    assert!(!probes::group_scaled_to(client, NAMESPACE, WORKER_MACHINE_SET, 2).await.unwrap());

    cluster.remove(&node_ref(&format!("{WORKER_MACHINE_SET}-0")));
    assert!(!probes::group_scaled_to(client, NAMESPACE, WORKER_MACHINE_SET, 2).await.unwrap());
}

#[tokio::test]
async fn test_group_scaled_to_unknown_set_is_transient() {
    let cluster = healthy_cluster();
    let err = probes::group_scaled_to(cluster.as_ref(), NAMESPACE, "nope", 1)
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_deployment_probes() {
    let cluster = healthy_cluster();
    let client = cluster.as_ref();
    let initial: Deployment = client
        .get(Some(NAMESPACE), "machine-api-controllers")
        .await
        .unwrap();

    assert!(probes::deployment_available(client, NAMESPACE, "machine-api-controllers").await.unwrap());
    assert!(probes::deployment_synced(client, &initial).await.unwrap());

    let mut scaled = initial.clone();
    scaled.replicas = 0;
    client.update(scaled).await.unwrap();
    assert!(!probes::deployment_synced(client, &initial).await.unwrap());

    let mut unavailable = initial.clone();
    unavailable.available_replicas = 0;
    client.update(unavailable).await.unwrap();
    assert!(!probes::deployment_available(client, NAMESPACE, "machine-api-controllers").await.unwrap());
}

#[tokio::test]
async fn test_cluster_operator_probe() {
    let cluster = healthy_cluster();
    assert!(probes::cluster_operator_available(cluster.as_ref(), "machine-api").await.unwrap());

    cluster.insert(common::cluster_operator("machine-api", false));
    assert!(!probes::cluster_operator_available(cluster.as_ref(), "machine-api").await.unwrap());
}

#[tokio::test]
async fn test_object_deleted_and_cascade() {
    let cluster = healthy_cluster();
    let set: MachineSet = cluster.get(Some(NAMESPACE), WORKER_MACHINE_SET).await.unwrap();
    let set_ref = set.object_ref();
    assert!(!probes::object_deleted(cluster.as_ref(), &set_ref).await.unwrap());

    cluster
        .delete_object(&set_ref, PropagationPolicy::Foreground)
        .await
        .unwrap();
    assert!(probes::object_deleted(cluster.as_ref(), &set_ref).await.unwrap());

    let machines: Vec<Machine> = cluster
        .list(Some(NAMESPACE), &LabelSelector::everything())
        .await
        .unwrap();
    assert!(machines.is_empty());

    cluster.fail_next_reads(1, ClientError::Forbidden("rbac".to_string()));
    let err = probes::object_deleted(cluster.as_ref(), &set_ref).await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_no_pods_with_prefix() {
    let cluster = healthy_cluster();
    assert!(probes::no_pods_with_prefix(cluster.as_ref(), "default", "workload").await.unwrap());

    cluster.insert(Pod {
        meta: settle::domain::models::ObjectMeta::named("workload-abcde").in_namespace("default"),
        phase: Some("Running".to_string()),
        node_name: None,
    });
    cluster.insert(Pod {
        meta: settle::domain::models::ObjectMeta::named("unrelated").in_namespace("default"),
        phase: Some("Running".to_string()),
        node_name: None,
    });
    assert!(!probes::no_pods_with_prefix(cluster.as_ref(), "default", "workload").await.unwrap());
    assert!(probes::no_pods_with_prefix(cluster.as_ref(), "other", "workload").await.unwrap());
}

#[tokio::test]
async fn test_queries_walk_from_node_to_machine_set() {
    let cluster = healthy_cluster();
    let queries = queries(&cluster);

    assert_eq!(queries.cluster_size().await.unwrap(), 2);
    let node = queries.worker_node().await.unwrap();
    let machine = queries.machine_from_node(&node).await.unwrap();
    assert_eq!(machine.node_ref.as_deref(), Some(node.meta.name.as_str()));
    let set = queries.machine_set_of(&machine).await.unwrap();
    assert_eq!(set.meta.name, WORKER_MACHINE_SET);

    assert_eq!(queries.machines_of(&set).await.unwrap().len(), 2);
    assert_eq!(queries.nodes_of(&set).await.unwrap().len(), 2);
    assert_eq!(queries.worker_machine_sets().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_queries_retry_transient_reads() {
    let cluster = healthy_cluster();
    cluster.fail_next_reads(3, ClientError::Connection("reset by peer".to_string()));

    assert_eq!(queries(&cluster).machines().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_machine_from_unannotated_node_is_fatal() {
    let cluster = healthy_cluster();
    let node = Node {
        meta: settle::domain::models::ObjectMeta::named("bare"),
        ..Node::default()
    };
    let err = queries(&cluster).machine_from_node(&node).await.unwrap_err();
    assert!(matches!(err, VerifyError::FatalConfiguration(_)));
}

#[tokio::test]
async fn test_scale_machine_set() {
    let cluster = healthy_cluster();
    let queries = queries(&cluster);

    queries.scale_machine_set(WORKER_MACHINE_SET, 5).await.unwrap();
    assert_eq!(queries.machine_set(WORKER_MACHINE_SET).await.unwrap().replicas, 5);

    let err = queries.scale_machine_set("missing", 1).await.unwrap_err();
    assert!(matches!(err, VerifyError::DeadlineExceeded { .. }));
}
