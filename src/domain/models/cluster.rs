//! Platform objects as seen by the verifier.
//!
//! These are deliberately thin projections of the platform's resources:
//! only the fields that probes and scenarios read or write are modelled.
//! Deployment and daemon set specs are kept as opaque JSON so that "spec is
//! unchanged" comparisons do not depend on which fields we chose to model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::ClientError;

/// Annotation a node carries naming the machine that backs it (`namespace/name`).
pub const MACHINE_ANNOTATION_KEY: &str = "machine.openshift.io/machine";

/// Kinds of platform objects the verifier knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Node,
    Machine,
    MachineSet,
    Deployment,
    DaemonSet,
    Pod,
    Job,
    ClusterAutoscaler,
    MachineAutoscaler,
    ClusterOperator,
}

impl ObjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "Node",
            Self::Machine => "Machine",
            Self::MachineSet => "MachineSet",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::Pod => "Pod",
            Self::Job => "Job",
            Self::ClusterAutoscaler => "ClusterAutoscaler",
            Self::MachineAutoscaler => "MachineAutoscaler",
            Self::ClusterOperator => "ClusterOperator",
        }
    }

    /// Whether objects of this kind live inside a namespace.
    pub const fn is_namespaced(self) -> bool {
        !matches!(
            self,
            Self::Node | Self::ClusterOperator | Self::ClusterAutoscaler
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner reference on an object's metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Option<String>,
    pub controller: bool,
}

/// Common object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub generate_name: Option<String>,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// True if `owner` is the controlling owner of this object.
    pub fn is_controlled_by(&self, kind: ObjectKind, owner: &ObjectMeta) -> bool {
        self.owner_references.iter().any(|r| {
            r.controller
                && r.kind == kind.as_str()
                && r.name == owner.name
                && match (&r.uid, &owner.uid) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        })
    }
}

/// Identity of a single object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// How dependents are handled when an object is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationPolicy {
    #[default]
    Foreground,
    Background,
    Orphan,
}

/// Equality-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub meta: ObjectMeta,
    pub unschedulable: bool,
    pub ready: bool,
    /// Memory capacity as a quantity string, e.g. `16Gi`.
    pub memory_capacity: Option<String>,
}

impl Node {
    /// Value of the machine back-reference annotation, if any.
    pub fn machine_annotation(&self) -> Option<&str> {
        self.meta
            .annotations
            .get(MACHINE_ANNOTATION_KEY)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub meta: ObjectMeta,
    /// Name of the node this machine claims, once it has joined.
    pub node_ref: Option<String>,
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSet {
    pub meta: ObjectMeta,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Labels stamped on machines created from the template.
    #[serde(default)]
    pub template_labels: BTreeMap<String, String>,
    /// Labels propagated to the nodes backing those machines.
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub provider_spec: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub meta: ObjectMeta,
    pub replicas: i32,
    pub available_replicas: i32,
    #[serde(default)]
    pub spec: Value,
}

impl Deployment {
    pub fn is_available(&self) -> bool {
        self.replicas > 0 && self.available_replicas >= self.replicas
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonSet {
    pub meta: ObjectMeta,
    pub desired_scheduled: i32,
    pub number_available: i32,
    #[serde(default)]
    pub spec: Value,
}

impl DaemonSet {
    pub fn is_available(&self) -> bool {
        self.desired_scheduled > 0 && self.number_available >= self.desired_scheduled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub meta: ObjectMeta,
    pub phase: Option<String>,
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    /// `Exists` or `Equal`.
    pub operator: String,
}

/// Batch job running a single container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub meta: ObjectMeta,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Resource requests, e.g. `memory -> 2Gi`, `cpu -> 500m`.
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    pub restart_policy: String,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    pub backoff_limit: i32,
    pub completions: i32,
    pub parallelism: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDownConfig {
    pub enabled: bool,
    pub delay_after_add: String,
    pub delay_after_delete: String,
    pub delay_after_failure: String,
    pub unneeded_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAutoscaler {
    pub meta: ObjectMeta,
    pub scale_down: ScaleDownConfig,
    pub max_nodes_total: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAutoscaler {
    pub meta: ObjectMeta,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub target_kind: String,
    pub target_api_version: String,
    pub target_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCondition {
    pub condition_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOperator {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
}

impl ClusterOperator {
    pub fn is_available(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == "Available" && c.status == "True")
    }
}

/// Typed access to a [`ClusterObject`] variant.
pub trait ClusterResource:
    TryFrom<ClusterObject, Error = ClientError> + Into<ClusterObject> + Send + 'static
{
    const KIND: ObjectKind;

    fn meta(&self) -> &ObjectMeta;

    fn object_ref(&self) -> ObjectRef {
        let meta = self.meta();
        ObjectRef {
            kind: Self::KIND,
            namespace: if Self::KIND.is_namespaced() {
                meta.namespace.clone()
            } else {
                None
            },
            name: meta.name.clone(),
        }
    }
}

macro_rules! cluster_objects {
    ($($variant:ident),* $(,)?) => {
        /// Any platform object the verifier can read or write.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ClusterObject {
            $($variant($variant),)*
        }

        impl ClusterObject {
            pub const fn kind(&self) -> ObjectKind {
                match self {
                    $(Self::$variant(_) => ObjectKind::$variant,)*
                }
            }

            pub fn meta(&self) -> &ObjectMeta {
                match self {
                    $(Self::$variant(o) => &o.meta,)*
                }
            }

            pub fn meta_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(Self::$variant(o) => &mut o.meta,)*
                }
            }
        }

        $(
            impl From<$variant> for ClusterObject {
                fn from(object: $variant) -> Self {
                    Self::$variant(object)
                }
            }

            impl TryFrom<ClusterObject> for $variant {
                type Error = ClientError;

                fn try_from(object: ClusterObject) -> Result<Self, ClientError> {
                    match object {
                        ClusterObject::$variant(inner) => Ok(inner),
                        other => Err(ClientError::UnexpectedKind {
                            expected: ObjectKind::$variant,
                            found: other.kind(),
                        }),
                    }
                }
            }

            impl ClusterResource for $variant {
                const KIND: ObjectKind = ObjectKind::$variant;

                fn meta(&self) -> &ObjectMeta {
                    &self.meta
                }
            }
        )*
    };
}

cluster_objects!(
    Node,
    Machine,
    MachineSet,
    Deployment,
    DaemonSet,
    Pod,
    Job,
    ClusterAutoscaler,
    MachineAutoscaler,
    ClusterOperator,
);

impl ClusterObject {
    pub fn object_ref(&self) -> ObjectRef {
        let meta = self.meta();
        ObjectRef {
            kind: self.kind(),
            namespace: if self.kind().is_namespaced() {
                meta.namespace.clone()
            } else {
                None
            },
            name: meta.name.clone(),
        }
    }
}

/// Parse a memory quantity (`16Gi`, `1.5Gi`, `512Mi`, `1G`, `1024`) into
/// bytes, rounding fractional bytes up.
///
/// Binary and decimal suffixes up to `Ei`/`E` are understood. Scientific
/// notation and sub-byte suffixes (`m`) are not.
pub fn parse_memory_quantity(quantity: &str) -> Option<i64> {
    const SUFFIXES: [(&str, i64); 12] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let quantity = quantity.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|&(suffix, multiplier)| {
            quantity
                .strip_suffix(suffix)
                .map(|number| (number, multiplier))
        })
        .unwrap_or((quantity, 1));
    scale_decimal(number, multiplier)
}

/// `number * multiplier` for a plain decimal like `1.5`, without going
/// through floating point.
fn scale_decimal(number: &str, multiplier: i64) -> Option<i64> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut bytes = whole.checked_mul(multiplier)?;
    if fraction.is_empty() {
        return Some(bytes);
    }

    let scale = 10_i128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
    let fraction: i128 = fraction.parse().ok()?;
    let part = fraction
        .checked_mul(i128::from(multiplier))?
        .checked_add(scale - 1)?
        / scale;
    bytes = bytes.checked_add(i64::try_from(part).ok()?)?;
    Some(bytes)
}
