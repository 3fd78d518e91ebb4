//! Cluster autoscaler scale up and down.
//!
//! Transient machine sets are put under machine autoscalers, a workload too
//! large for the cluster is started, and the autoscaler's own notifications
//! are counted to check that it grows the cluster up to `maxNodesTotal` and
//! shrinks it back once the workload is gone.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Scenario, ScenarioContext, Suite, WaitBudget};
use crate::domain::errors::{ClientError, VerifyResult};
use crate::domain::models::{
    parse_memory_quantity, ClusterAutoscaler, ClusterResource, Job, LabelSelector,
    MachineAutoscaler, MachineSet, ObjectMeta, ObjectRef, PropagationPolicy, ScaleDownConfig,
    Toleration,
};
use crate::domain::ports::{ClusterClient, ClusterClientExt};
use crate::services::{probes, EventCounter, EventWatcher, NotificationFilter, Predicate};

pub const AUTOSCALING_TEST_LABEL: &str = "test.autoscaling.label";
pub const AUTOSCALER_COMPONENT: &str = "cluster-autoscaler";
pub const AUTOSCALER_OBJECT_KIND: &str = "ConfigMap";
pub const SCALED_UP_GROUP: &str = "ScaledUpGroup";
pub const SCALE_DOWN_EMPTY: &str = "ScaleDownEmpty";
pub const MAX_NODES_TOTAL_REACHED: &str = "MaxNodesTotalReached";
pub const AUTOSCALER_WORKER_LABEL: &str = "machine.openshift.io/autoscaler-e2e-worker";
pub const WORKLOAD_NAME: &str = "e2e-autoscaler-workload";
pub const WORKLOAD_NAMESPACE: &str = "default";
pub const CLUSTER_LABEL: &str = "machine.openshift.io/cluster-api-cluster";
pub const MACHINE_SET_LABEL: &str = "machine.openshift.io/cluster-api-machineset";

const TRANSIENT_MACHINE_SETS: usize = 3;
const SCALE_DELAY: &str = "10s";
// At least twice the autoscaler sync period, with a large common multiple,
// so a node with freshly scheduled pods is never seen as empty.
const UNNEEDED_TIME: &str = "23s";

pub fn scenarios() -> Vec<Box<dyn Scenario>> {
    vec![Box::new(ScaleUpAndDown)]
}

/// Jobs sized so each pod needs a node of its own.
pub fn workload_job(jobs: i32, memory_request_bytes: i64) -> Job {
    Job {
        meta: ObjectMeta::named(WORKLOAD_NAME)
            .in_namespace(WORKLOAD_NAMESPACE)
            .with_label(AUTOSCALING_TEST_LABEL, ""),
        container_name: WORKLOAD_NAME.to_string(),
        image: "busybox".to_string(),
        command: vec!["sleep".to_string(), "86400".to_string()],
        requests: BTreeMap::from([
            ("memory".to_string(), memory_request_bytes.to_string()),
            ("cpu".to_string(), "500m".to_string()),
        ]),
        restart_policy: "Never".to_string(),
        node_selector: BTreeMap::from([(AUTOSCALER_WORKER_LABEL.to_string(), String::new())]),
        tolerations: vec![Toleration {
            key: "kubemark".to_string(),
            operator: "Exists".to_string(),
        }],
        backoff_limit: 4,
        completions: jobs,
        parallelism: jobs,
    }
}

/// Autoscaler configured for fast scale-down and capped at `max_nodes_total`.
pub fn cluster_autoscaler(max_nodes_total: i32) -> ClusterAutoscaler {
    ClusterAutoscaler {
        meta: ObjectMeta::named("default").with_label(AUTOSCALING_TEST_LABEL, ""),
        scale_down: ScaleDownConfig {
            enabled: true,
            delay_after_add: SCALE_DELAY.to_string(),
            delay_after_delete: SCALE_DELAY.to_string(),
            delay_after_failure: SCALE_DELAY.to_string(),
            unneeded_time: UNNEEDED_TIME.to_string(),
        },
        max_nodes_total,
    }
}

pub fn machine_autoscaler(target: &MachineSet, min_replicas: i32, max_replicas: i32) -> MachineAutoscaler {
    let mut meta = ObjectMeta::default().with_label(AUTOSCALING_TEST_LABEL, "");
    meta.generate_name = Some(format!("autoscale-{}", target.meta.name));
    meta.namespace = target.meta.namespace.clone();
    MachineAutoscaler {
        meta,
        min_replicas,
        max_replicas,
        target_kind: "MachineSet".to_string(),
        target_api_version: "machine.openshift.io/v1beta1".to_string(),
        target_name: target.meta.name.clone(),
    }
}

/// One-replica copy of `template` whose nodes carry the autoscaler worker label.
pub fn transient_machine_set(template: &MachineSet, name: &str) -> MachineSet {
    let mut meta = ObjectMeta::named(name);
    meta.namespace = template.meta.namespace.clone();
    if let Some(cluster) = template.meta.labels.get(CLUSTER_LABEL) {
        meta = meta.with_label(CLUSTER_LABEL, cluster.clone());
    }

    let mut selector = template.selector.clone();
    selector.insert(MACHINE_SET_LABEL.to_string(), name.to_string());
    let mut template_labels = template.template_labels.clone();
    template_labels.insert(MACHINE_SET_LABEL.to_string(), name.to_string());

    MachineSet {
        meta,
        replicas: 1,
        ready_replicas: 0,
        available_replicas: 0,
        selector,
        template_labels,
        node_labels: BTreeMap::from([(AUTOSCALER_WORKER_LABEL.to_string(), String::new())]),
        provider_spec: template.provider_spec.clone(),
    }
}

fn autoscaler_filter(reason: &str, message_prefix: &str) -> NotificationFilter {
    NotificationFilter::new()
        .component(AUTOSCALER_COMPONENT)
        .reason(reason)
        .involved_kind(AUTOSCALER_OBJECT_KIND)
        .message_prefix(message_prefix)
}

/// Groups keyed by `namespace/name`, flagged once the autoscaler resized them.
pub type ScaledGroups = Arc<Mutex<BTreeMap<String, bool>>>;

/// Counts scale-up notifications and marks each group they mention.
pub fn scale_up_counter(watcher: &EventWatcher, scaled_groups: ScaledGroups) -> EventCounter {
    let filter = autoscaler_filter(SCALED_UP_GROUP, "Scale-up: setting group");
    let predicate = Predicate::new(move |n| {
        if !filter.matches(n) {
            return false;
        }
        let mut groups = scaled_groups.lock().unwrap_or_else(PoisonError::into_inner);
        for (group, scaled) in groups.iter_mut() {
            if !*scaled && n.message.starts_with(&format!("Scale-up: setting group {group} size")) {
                *scaled = true;
            }
        }
        true
    });
    EventCounter::counting(watcher, "scale-up", predicate)
}

pub fn scale_down_counter(watcher: &EventWatcher) -> EventCounter {
    EventCounter::counting(
        watcher,
        "scale-down",
        autoscaler_filter(SCALE_DOWN_EMPTY, "Scale-down: empty node").into(),
    )
}

pub fn max_nodes_total_counter(watcher: &EventWatcher) -> EventCounter {
    EventCounter::counting(
        watcher,
        "max-nodes-total",
        autoscaler_filter(MAX_NODES_TOTAL_REACHED, "Max total nodes in cluster reached").into(),
    )
}

async fn groups_ready(client: &dyn ClusterClient, namespace: &str, sets: &[MachineSet]) -> VerifyResult<bool> {
    for set in sets {
        if !probes::group_scaled_to(client, namespace, &set.meta.name, 1).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Grow to the node cap under load, then shrink back once the load is gone.
pub struct ScaleUpAndDown;

impl ScaleUpAndDown {
    async fn create_machine_sets(&self, ctx: &ScenarioContext) -> Result<Vec<MachineSet>> {
        let queries = ctx.queries();
        let existing = queries.machine_sets().await?;
        ensure!(!existing.is_empty(), "no machine sets in {}", ctx.namespace());
        let machines = queries.machines().await?;
        let nodes = queries.cluster_size().await?;
        tracing::info!(
            machine_sets = existing.len(),
            machines = machines.len(),
            nodes,
            "Existing cluster"
        );
        ensure!(
            nodes == machines.len(),
            "expected one machine per node, have {nodes} nodes and {} machines",
            machines.len()
        );

        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
        let mut created = Vec::with_capacity(TRANSIENT_MACHINE_SETS);
        for i in 0..TRANSIENT_MACHINE_SETS {
            let template = &existing[i % existing.len()];
            let set = transient_machine_set(template, &format!("e2e-{suffix}-w-{i}"));
            let set = ctx
                .client()
                .create(set)
                .await
                .context("failed to create a transient machine set")?;
            ctx.cleanup().track(set.object_ref());
            created.push(set);
        }
        Ok(created)
    }

    async fn create_machine_autoscalers(&self, ctx: &ScenarioContext, sets: &[MachineSet]) -> Result<Vec<ObjectRef>> {
        let mut created = Vec::with_capacity(sets.len());
        for set in sets {
            tracing::info!(machine_set = %set.meta.name, min = 1, max = 2, "Creating machine autoscaler");
            let autoscaler = ctx
                .client()
                .create(machine_autoscaler(set, 1, 2))
                .await
                .context("failed to create a machine autoscaler")?;
            ctx.cleanup().track(autoscaler.object_ref());
            created.push(autoscaler.object_ref());
        }
        Ok(created)
    }

    async fn ensure_cluster_autoscaler(&self, ctx: &ScenarioContext, max_nodes_total: i32) -> Result<()> {
        tracing::info!(max_nodes_total, "Creating cluster autoscaler");
        match ctx.client().create(cluster_autoscaler(max_nodes_total)).await {
            Ok(created) => {
                ctx.cleanup().track(created.object_ref());
                Ok(())
            }
            Err(ClientError::Conflict(_)) => {
                tracing::warn!("Cluster autoscaler already exists, using it as is");
                Ok(())
            }
            Err(e) => Err(e).context("failed to create the cluster autoscaler"),
        }
    }

    async fn workload_memory(&self, ctx: &ScenarioContext) -> Result<i64> {
        let worker = ctx.queries().worker_node().await?;
        let capacity = worker
            .memory_capacity
            .as_deref()
            .with_context(|| format!("worker node {:?} reports no memory capacity", worker.meta.name))?;
        let bytes = parse_memory_quantity(capacity)
            .with_context(|| format!("unparseable memory capacity {capacity:?}"))?;
        tracing::info!(node = %worker.meta.name, capacity, "Worker memory capacity");
        // 70%: enough to need every node, too much for two pods on one node.
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let request = (bytes as f64 * 0.7) as i64;
        Ok(request)
    }

    async fn delete_now(&self, ctx: &ScenarioContext, target: &ObjectRef) -> Result<()> {
        ctx.client()
            .delete_object(target, PropagationPolicy::Foreground)
            .await
            .or_else(|e| match e {
                ClientError::NotFound { .. } => Ok(()),
                other => Err(other),
            })
            .with_context(|| format!("failed to delete {target}"))?;
        ctx.cleanup().forget(target);
        Ok(())
    }

    async fn exercise(
        &self,
        ctx: &ScenarioContext,
        watcher: &EventWatcher,
        sets: &[MachineSet],
        autoscalers: &[ObjectRef],
        max_nodes_total: i32,
    ) -> Result<()> {
        let expansion = u64::try_from(sets.len())?;
        let expected = expansion - 1;

        let memory = self.workload_memory(ctx).await?;
        let scaled_groups: ScaledGroups = Arc::new(Mutex::new(
            sets.iter()
                .map(|s| {
                    let namespace = s.meta.namespace.as_deref().unwrap_or_default();
                    (format!("{namespace}/{}", s.meta.name), false)
                })
                .collect(),
        ));
        let scale_up = scale_up_counter(watcher, Arc::clone(&scaled_groups));
        let max_nodes = max_nodes_total_counter(watcher);

        // One job more than the cap keeps MaxNodesTotalReached coming.
        let jobs = max_nodes_total + 1;
        tracing::info!(jobs, memory, "Creating scale-out workload");
        let workload = ctx
            .client()
            .create(workload_job(jobs, memory))
            .await
            .context("failed to create the workload")?;
        let workload_ref = workload.object_ref();
        ctx.cleanup().track(workload_ref.clone());

        let scale_up_ref = &scale_up;
        ctx.waiter(format!("{expected} {SCALED_UP_GROUP} notifications"), WaitBudget::Long)
            .eventually(|| async move {
                let observed = scale_up_ref.get();
                tracing::info!(observed, expected, "Counting {SCALED_UP_GROUP} notifications");
                Ok(observed == expected)
            })
            .await
            .context("the autoscaler did not scale up to the node cap")?;

        let max_nodes_ref = &max_nodes;
        ctx.waiter(format!("a {MAX_NODES_TOTAL_REACHED} notification"), WaitBudget::Short)
            .eventually(|| async move { Ok(max_nodes_ref.get() >= 1) })
            .await
            .context("the autoscaler never reported reaching the node cap")?;

        ctx.waiter(format!("no more {SCALED_UP_GROUP} notifications"), WaitBudget::Short)
            .consistently(|| async move {
                let observed = scale_up_ref.get();
                tracing::info!(observed, expected, "At the node cap, expecting no more scale-ups");
                Ok(observed == expected)
            })
            .await
            .context("the autoscaler grew the cluster past the node cap")?;

        let unscaled: Vec<String> = scaled_groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, scaled)| !**scaled)
            .map(|(group, _)| group.clone())
            .collect();
        tracing::info!(?unscaled, "Groups not resized by the autoscaler");

        let scale_down = scale_down_counter(watcher);
        tracing::info!("Deleting workload");
        self.delete_now(ctx, &workload_ref).await?;

        let scale_down_ref = &scale_down;
        ctx.waiter(format!("{expected} {SCALE_DOWN_EMPTY} notifications"), WaitBudget::Long)
            .eventually(|| async move {
                let observed = scale_down_ref.get();
                tracing::info!(observed, expected, "Counting {SCALE_DOWN_EMPTY} notifications");
                Ok(observed >= expected)
            })
            .await
            .context("the autoscaler did not scale back down")?;

        let client = ctx.client();
        ctx.waiter("workload pods gone", WaitBudget::Medium)
            .eventually(|| probes::no_pods_with_prefix(client, WORKLOAD_NAMESPACE, WORKLOAD_NAME))
            .await
            .context("workload pods were not removed")?;

        // Autoscalers go first so they cannot fight the machine set deletion.
        for autoscaler in autoscalers {
            self.delete_now(ctx, autoscaler).await?;
        }
        for set in sets {
            let target = set.object_ref();
            self.delete_now(ctx, &target).await?;
            let target = &target;
            ctx.waiter(format!("{target} deleted"), WaitBudget::Long)
                .eventually(|| probes::object_deleted(client, target))
                .await
                .with_context(|| format!("{target} was not deleted"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Scenario for ScaleUpAndDown {
    fn name(&self) -> &'static str {
        "autoscaler scales up and down"
    }

    fn suite(&self) -> Suite {
        Suite::Autoscaler
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        let started = Utc::now();
        let sets = self.create_machine_sets(ctx).await?;

        let client = ctx.client();
        let namespace = ctx.namespace();
        let sets_ref = sets.as_slice();
        ctx.waiter(format!("{} transient machine sets ready", sets.len()), WaitBudget::Long)
            .eventually(|| groups_ready(client, namespace, sets_ref))
            .await
            .context("transient machine sets did not come up")?;

        let nodes = ctx.queries().cluster_size().await?;
        let autoscalers = self.create_machine_autoscalers(ctx, &sets).await?;
        let expansion = sets.len();
        ensure!(expansion > 1, "need more than one transient machine set");
        // One short of what the workload asks for, to see the cap respected.
        let max_nodes_total = i32::try_from(nodes + expansion - 1)?;

        let watcher = ctx.watcher();
        watcher.start().await.context("failed to watch notifications")?;
        let _log = watcher.on_notification(
            "autoscaler-log",
            NotificationFilter::new().component(AUTOSCALER_COMPONENT).into(),
            |n| {
                tracing::info!(object = %n.involved_object.name, "{}", n.message);
                Ok(())
            },
        );

        let outcome = match self.ensure_cluster_autoscaler(ctx, max_nodes_total).await {
            Ok(()) => {
                self.exercise(ctx, &watcher, &sets, &autoscalers, max_nodes_total)
                    .await
            }
            Err(e) => Err(e),
        };
        watcher.stop().await;

        let stats = watcher.stats();
        tracing::info!(
            received = stats.received,
            handler_failures = stats.handler_failures,
            elapsed_secs = (Utc::now() - started).num_seconds(),
            "Autoscaler scenario finished"
        );
        if let Some(e) = watcher.subscription_error() {
            tracing::warn!(error = %e, "Notification stream failed during the scenario");
        }
        outcome
    }
}
