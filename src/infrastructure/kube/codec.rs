//! Conversion between platform objects and `DynamicObject`s.
//!
//! Every kind goes through the dynamic API; the codec reads and writes the
//! handful of JSON fields the models carry.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as meta_v1;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use serde_json::{json, Map, Value};

use crate::domain::errors::ClientError;
use crate::domain::models::{
    ClusterAutoscaler, ClusterObject, ClusterOperator, DaemonSet, Deployment, Job, Machine,
    MachineAutoscaler, MachineSet, Node, ObjectKind, ObjectMeta, OperatorCondition,
    OwnerReference, Pod, ScaleDownConfig, Toleration,
};

/// API coordinates of `kind`.
pub fn api_resource(kind: ObjectKind) -> ApiResource {
    let (group, version, plural) = match kind {
        ObjectKind::Node => ("", "v1", "nodes"),
        ObjectKind::Pod => ("", "v1", "pods"),
        ObjectKind::Deployment => ("apps", "v1", "deployments"),
        ObjectKind::DaemonSet => ("apps", "v1", "daemonsets"),
        ObjectKind::Job => ("batch", "v1", "jobs"),
        ObjectKind::Machine => ("machine.openshift.io", "v1beta1", "machines"),
        ObjectKind::MachineSet => ("machine.openshift.io", "v1beta1", "machinesets"),
        ObjectKind::ClusterAutoscaler => ("autoscaling.openshift.io", "v1", "clusterautoscalers"),
        ObjectKind::MachineAutoscaler => {
            ("autoscaling.openshift.io", "v1beta1", "machineautoscalers")
        }
        ObjectKind::ClusterOperator => ("config.openshift.io", "v1", "clusteroperators"),
    };
    let api_version = if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    };
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version,
        kind: kind.as_str().to_string(),
        plural: plural.to_string(),
    }
}

fn kind_from_str(kind: &str) -> Option<ObjectKind> {
    [
        ObjectKind::Node,
        ObjectKind::Machine,
        ObjectKind::MachineSet,
        ObjectKind::Deployment,
        ObjectKind::DaemonSet,
        ObjectKind::Pod,
        ObjectKind::Job,
        ObjectKind::ClusterAutoscaler,
        ObjectKind::MachineAutoscaler,
        ObjectKind::ClusterOperator,
    ]
    .into_iter()
    .find(|k| k.as_str() == kind)
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn i32_at(value: &Value, pointer: &str) -> Option<i32> {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}

fn bool_at(value: &Value, pointer: &str) -> Option<bool> {
    value.pointer(pointer).and_then(Value::as_bool)
}

fn map_at(value: &Value, pointer: &str) -> BTreeMap<String, String> {
    value
        .pointer(pointer)
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn conditions_at(value: &Value, pointer: &str) -> Vec<OperatorCondition> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| OperatorCondition {
                    condition_type: str_at(c, "/type").unwrap_or_default(),
                    status: str_at(c, "/status").unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_meta(meta: meta_v1::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.unwrap_or_default(),
        generate_name: meta.generate_name,
        namespace: meta.namespace,
        uid: meta.uid,
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        owner_references: meta
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|r| OwnerReference {
                kind: r.kind,
                name: r.name,
                uid: Some(r.uid),
                controller: r.controller.unwrap_or(false),
            })
            .collect(),
    }
}

fn encode_meta(meta: &ObjectMeta) -> meta_v1::ObjectMeta {
    let non_empty = |map: &BTreeMap<String, String>| (!map.is_empty()).then(|| map.clone());
    let owner_references: Vec<meta_v1::OwnerReference> = meta
        .owner_references
        .iter()
        .map(|r| meta_v1::OwnerReference {
            api_version: kind_from_str(&r.kind)
                .map_or_else(|| "v1".to_string(), |k| api_resource(k).api_version),
            kind: r.kind.clone(),
            name: r.name.clone(),
            uid: r.uid.clone().unwrap_or_default(),
            controller: Some(r.controller),
            ..meta_v1::OwnerReference::default()
        })
        .collect();

    meta_v1::ObjectMeta {
        name: (!meta.name.is_empty()).then(|| meta.name.clone()),
        generate_name: meta.generate_name.clone(),
        namespace: meta.namespace.clone(),
        labels: non_empty(&meta.labels),
        annotations: non_empty(&meta.annotations),
        owner_references: (!owner_references.is_empty()).then_some(owner_references),
        ..meta_v1::ObjectMeta::default()
    }
}

/// Decode a dynamic object of `kind` into the matching model.
pub fn decode(kind: ObjectKind, object: DynamicObject) -> Result<ClusterObject, ClientError> {
    let meta = decode_meta(object.metadata);
    let data = object.data;

    let decoded = match kind {
        ObjectKind::Node => Node {
            meta,
            unschedulable: bool_at(&data, "/spec/unschedulable").unwrap_or(false),
            ready: data
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conditions| {
                    conditions.iter().any(|c| {
                        str_at(c, "/type").as_deref() == Some("Ready")
                            && str_at(c, "/status").as_deref() == Some("True")
                    })
                }),
            memory_capacity: str_at(&data, "/status/capacity/memory"),
        }
        .into(),
        ObjectKind::Machine => Machine {
            meta,
            node_ref: str_at(&data, "/status/nodeRef/name"),
            phase: str_at(&data, "/status/phase"),
        }
        .into(),
        ObjectKind::MachineSet => MachineSet {
            meta,
            replicas: i32_at(&data, "/spec/replicas").unwrap_or(0),
            ready_replicas: i32_at(&data, "/status/readyReplicas").unwrap_or(0),
            available_replicas: i32_at(&data, "/status/availableReplicas").unwrap_or(0),
            selector: map_at(&data, "/spec/selector/matchLabels"),
            template_labels: map_at(&data, "/spec/template/metadata/labels"),
            node_labels: map_at(&data, "/spec/template/spec/metadata/labels"),
            provider_spec: data
                .pointer("/spec/template/spec/providerSpec")
                .cloned()
                .unwrap_or(Value::Null),
        }
        .into(),
        ObjectKind::Deployment => {
            let mut spec = data.get("spec").cloned().unwrap_or(Value::Null);
            let replicas = spec
                .as_object_mut()
                .and_then(|s| s.remove("replicas"))
                .and_then(|r| r.as_i64())
                .and_then(|r| i32::try_from(r).ok())
                .unwrap_or(1);
            Deployment {
                meta,
                replicas,
                available_replicas: i32_at(&data, "/status/availableReplicas").unwrap_or(0),
                spec,
            }
            .into()
        }
        ObjectKind::DaemonSet => DaemonSet {
            meta,
            desired_scheduled: i32_at(&data, "/status/desiredNumberScheduled").unwrap_or(0),
            number_available: i32_at(&data, "/status/numberAvailable").unwrap_or(0),
            spec: data.get("spec").cloned().unwrap_or(Value::Null),
        }
        .into(),
        ObjectKind::Pod => Pod {
            meta,
            phase: str_at(&data, "/status/phase"),
            node_name: str_at(&data, "/spec/nodeName"),
        }
        .into(),
        ObjectKind::Job => decode_job(meta, &data).into(),
        ObjectKind::ClusterAutoscaler => ClusterAutoscaler {
            meta,
            scale_down: ScaleDownConfig {
                enabled: bool_at(&data, "/spec/scaleDown/enabled").unwrap_or(false),
                delay_after_add: str_at(&data, "/spec/scaleDown/delayAfterAdd").unwrap_or_default(),
                delay_after_delete: str_at(&data, "/spec/scaleDown/delayAfterDelete")
                    .unwrap_or_default(),
                delay_after_failure: str_at(&data, "/spec/scaleDown/delayAfterFailure")
                    .unwrap_or_default(),
                unneeded_time: str_at(&data, "/spec/scaleDown/unneededTime").unwrap_or_default(),
            },
            max_nodes_total: i32_at(&data, "/spec/resourceLimits/maxNodesTotal").unwrap_or(0),
        }
        .into(),
        ObjectKind::MachineAutoscaler => MachineAutoscaler {
            meta,
            min_replicas: i32_at(&data, "/spec/minReplicas").unwrap_or(0),
            max_replicas: i32_at(&data, "/spec/maxReplicas").unwrap_or(0),
            target_kind: str_at(&data, "/spec/scaleTargetRef/kind").unwrap_or_default(),
            target_api_version: str_at(&data, "/spec/scaleTargetRef/apiVersion").unwrap_or_default(),
            target_name: str_at(&data, "/spec/scaleTargetRef/name").unwrap_or_default(),
        }
        .into(),
        ObjectKind::ClusterOperator => ClusterOperator {
            meta,
            conditions: conditions_at(&data, "/status/conditions"),
        }
        .into(),
    };
    Ok(decoded)
}

fn decode_job(meta: ObjectMeta, data: &Value) -> Job {
    let pod = data
        .pointer("/spec/template/spec")
        .cloned()
        .unwrap_or(Value::Null);
    let container = pod.pointer("/containers/0").cloned().unwrap_or(Value::Null);
    Job {
        meta,
        container_name: str_at(&container, "/name").unwrap_or_default(),
        image: str_at(&container, "/image").unwrap_or_default(),
        command: container
            .get("command")
            .and_then(Value::as_array)
            .map(|c| c.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
        requests: map_at(&container, "/resources/requests"),
        restart_policy: str_at(&pod, "/restartPolicy").unwrap_or_default(),
        node_selector: map_at(&pod, "/nodeSelector"),
        tolerations: pod
            .get("tolerations")
            .and_then(Value::as_array)
            .map(|t| {
                t.iter()
                    .map(|t| Toleration {
                        key: str_at(t, "/key").unwrap_or_default(),
                        operator: str_at(t, "/operator").unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        backoff_limit: i32_at(data, "/spec/backoffLimit").unwrap_or(0),
        completions: i32_at(data, "/spec/completions").unwrap_or(1),
        parallelism: i32_at(data, "/spec/parallelism").unwrap_or(1),
    }
}

fn encode_data(object: &ClusterObject) -> Value {
    match object {
        ClusterObject::Node(node) => json!({ "spec": { "unschedulable": node.unschedulable } }),
        // Machines are only ever read.
        ClusterObject::Machine(_) | ClusterObject::Pod(_) | ClusterObject::ClusterOperator(_) => {
            json!({})
        }
        ClusterObject::MachineSet(set) => {
            let mut spec = Map::new();
            spec.insert("replicas".to_string(), json!(set.replicas));
            if !set.selector.is_empty() {
                spec.insert("selector".to_string(), json!({ "matchLabels": set.selector }));
            }
            let mut template_spec = Map::new();
            if !set.node_labels.is_empty() {
                template_spec.insert("metadata".to_string(), json!({ "labels": set.node_labels }));
            }
            if !set.provider_spec.is_null() {
                template_spec.insert("providerSpec".to_string(), set.provider_spec.clone());
            }
            spec.insert(
                "template".to_string(),
                json!({
                    "metadata": { "labels": set.template_labels },
                    "spec": template_spec,
                }),
            );
            json!({ "spec": spec })
        }
        ClusterObject::Deployment(deployment) => {
            let mut spec = deployment.spec.clone();
            if let Some(spec) = spec.as_object_mut() {
                spec.insert("replicas".to_string(), json!(deployment.replicas));
            } else {
                spec = json!({ "replicas": deployment.replicas });
            }
            json!({ "spec": spec })
        }
        ClusterObject::DaemonSet(daemon_set) => json!({ "spec": daemon_set.spec }),
        ClusterObject::Job(job) => json!({
            "spec": {
                "backoffLimit": job.backoff_limit,
                "completions": job.completions,
                "parallelism": job.parallelism,
                "template": {
                    "spec": {
                        "containers": [{
                            "name": job.container_name,
                            "image": job.image,
                            "command": job.command,
                            "resources": { "requests": job.requests },
                        }],
                        "restartPolicy": job.restart_policy,
                        "nodeSelector": job.node_selector,
                        "tolerations": job
                            .tolerations
                            .iter()
                            .map(|t| json!({ "key": t.key, "operator": t.operator }))
                            .collect::<Vec<_>>(),
                    }
                }
            }
        }),
        ClusterObject::ClusterAutoscaler(autoscaler) => json!({
            "spec": {
                "scaleDown": {
                    "enabled": autoscaler.scale_down.enabled,
                    "delayAfterAdd": autoscaler.scale_down.delay_after_add,
                    "delayAfterDelete": autoscaler.scale_down.delay_after_delete,
                    "delayAfterFailure": autoscaler.scale_down.delay_after_failure,
                    "unneededTime": autoscaler.scale_down.unneeded_time,
                },
                "resourceLimits": { "maxNodesTotal": autoscaler.max_nodes_total },
            }
        }),
        ClusterObject::MachineAutoscaler(autoscaler) => json!({
            "spec": {
                "minReplicas": autoscaler.min_replicas,
                "maxReplicas": autoscaler.max_replicas,
                "scaleTargetRef": {
                    "kind": autoscaler.target_kind,
                    "apiVersion": autoscaler.target_api_version,
                    "name": autoscaler.target_name,
                },
            }
        }),
    }
}

/// Encode a model as a dynamic object. Status is never written.
pub fn encode(object: &ClusterObject) -> DynamicObject {
    let resource = api_resource(object.kind());
    DynamicObject {
        types: Some(TypeMeta {
            api_version: resource.api_version,
            kind: resource.kind,
        }),
        metadata: encode_meta(object.meta()),
        data: encode_data(object),
    }
}
