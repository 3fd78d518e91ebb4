use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure for settle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Polling interval and timeouts used by convergence waits
    #[serde(default)]
    pub waits: WaitConfig,

    /// Where the machine API lives and how workers are labelled
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Convergence wait configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WaitConfig {
    /// Delay between two probes, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for quick checks (deployment available, object fetched), in seconds
    #[serde(default = "default_short_timeout_secs")]
    pub short_timeout_secs: u64,

    /// Timeout for reconciliation after a disruption, in seconds
    #[serde(default = "default_medium_timeout_secs")]
    pub medium_timeout_secs: u64,

    /// Timeout for anything that provisions machines, in seconds
    #[serde(default = "default_long_timeout_secs")]
    pub long_timeout_secs: u64,
}

const fn default_poll_interval_ms() -> u64 {
    3_000
}

const fn default_short_timeout_secs() -> u64 {
    60
}

const fn default_medium_timeout_secs() -> u64 {
    180
}

const fn default_long_timeout_secs() -> u64 {
    900
}

impl WaitConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.short_timeout_secs)
    }

    pub const fn medium_timeout(&self) -> Duration {
        Duration::from_secs(self.medium_timeout_secs)
    }

    pub const fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            short_timeout_secs: default_short_timeout_secs(),
            medium_timeout_secs: default_medium_timeout_secs(),
            long_timeout_secs: default_long_timeout_secs(),
        }
    }
}

/// Cluster layout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterConfig {
    /// Namespace holding machines, machine sets and the machine API components
    #[serde(default = "default_machine_api_namespace")]
    pub machine_api_namespace: String,

    /// Label carried by worker nodes
    #[serde(default = "default_worker_node_label")]
    pub worker_node_label: String,

    /// Label carried by worker machines
    #[serde(default = "default_worker_machine_label")]
    pub worker_machine_label: String,

    /// Kubeconfig context to use; the current context when unset
    #[serde(default)]
    pub kube_context: Option<String>,
}

fn default_machine_api_namespace() -> String {
    "openshift-machine-api".to_string()
}

fn default_worker_node_label() -> String {
    "node-role.kubernetes.io/worker".to_string()
}

fn default_worker_machine_label() -> String {
    "machine.openshift.io/cluster-api-machine-role".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            machine_api_namespace: default_machine_api_namespace(),
            worker_node_label: default_worker_node_label(),
            worker_machine_label: default_worker_machine_label(),
            kube_context: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
