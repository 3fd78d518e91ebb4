pub mod cluster;
pub mod config;
pub mod notification;

pub use cluster::{
    parse_memory_quantity, ClusterAutoscaler, ClusterObject, ClusterOperator, ClusterResource,
    DaemonSet, Deployment, Job, LabelSelector, Machine, MachineAutoscaler, MachineSet, Node,
    ObjectKind, ObjectMeta, ObjectRef, OperatorCondition, OwnerReference, Pod,
    PropagationPolicy, ScaleDownConfig, Toleration, MACHINE_ANNOTATION_KEY,
};
pub use config::{ClusterConfig, Config, LoggingConfig, WaitConfig};
pub use notification::{InvolvedObject, Notification, NotificationBuilder, SourceIdentity};
