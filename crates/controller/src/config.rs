//! Controller configuration
//!
//! An optional YAML file (path from `NODE_HEALER_CONFIG`) layered under
//! `HEALER_*` environment variables. Nested keys use `__`, e.g.
//! `HEALER_PROMETHEUS__URL`.

use anyhow::{Context, Result};
use healer_lib::evaluator::{EvaluatorConfig, SchedulerConfig};
use healer_lib::remediation::ExecutorConfig;
use healer_lib::{MetricName, Policy, Scorer, StaticPolicyResolver};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "NODE_HEALER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/node-healer/config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Identifies this replica in logs
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Port for health, metrics and status endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Only watch nodes matching this label selector
    #[serde(default)]
    pub node_label_selector: Option<String>,

    #[serde(default)]
    pub prometheus: PrometheusSettings,

    /// Signal weights, normalized at startup
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,

    /// Evaluated in order; the first policy whose selector matches wins
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicySettings>,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusSettings {
    #[serde(default = "default_prometheus_url")]
    pub url: String,

    #[serde(default = "default_prometheus_timeout")]
    pub timeout_secs: u64,

    /// PromQL per signal; `{node}` is replaced with the node name
    #[serde(default = "default_queries")]
    pub queries: BTreeMap<String, String>,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            timeout_secs: default_prometheus_timeout(),
            queries: default_queries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_policy_name")]
    pub name: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default = "default_unhealthy_score")]
    pub unhealthy_score: f64,

    #[serde(default = "default_evaluation_window")]
    pub evaluation_window_secs: u64,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default = "default_max_concurrent_drains")]
    pub max_concurrent_drains: usize,

    #[serde(default = "default_max_remediation_attempts")]
    pub max_remediation_attempts: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            name: default_policy_name(),
            node_selector: BTreeMap::new(),
            unhealthy_score: default_unhealthy_score(),
            evaluation_window_secs: default_evaluation_window(),
            drain_timeout_secs: default_drain_timeout(),
            cooldown_secs: default_cooldown(),
            max_concurrent_drains: default_max_concurrent_drains(),
            max_remediation_attempts: default_max_remediation_attempts(),
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> Policy {
        Policy {
            name: self.name.clone(),
            node_selector: self.node_selector.clone(),
            unhealthy_score: self.unhealthy_score,
            evaluation_window: Duration::from_secs(self.evaluation_window_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_concurrent_drains: self.max_concurrent_drains,
            max_remediation_attempts: self.max_remediation_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON in an annotation on the Node object
    #[default]
    Annotation,
    /// One JSON file per node under `path`
    File,
    /// Lost on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudSettings {
    /// Replacement service base URL; replacement is disabled when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,

    /// Node label carrying the pool name
    #[serde(default = "default_pool_label")]
    pub pool_label: Option<String>,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_cloud_timeout(),
            pool_label: default_pool_label(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_requeue")]
    pub default_requeue_secs: u64,

    #[serde(default = "default_collection_retry")]
    pub collection_retry_secs: u64,

    #[serde(default = "default_collect_timeout")]
    pub collect_timeout_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_drain_poll_interval")]
    pub drain_poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_requeue_secs: default_requeue(),
            collection_retry_secs: default_collection_retry(),
            collect_timeout_secs: default_collect_timeout(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            drain_poll_interval_secs: default_drain_poll_interval(),
        }
    }
}

fn default_controller_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "node-healer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_prometheus_timeout() -> u64 {
    10
}

fn default_queries() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            MetricName::DISK_IO_WAIT.to_string(),
            r#"avg(rate(node_cpu_seconds_total{mode="iowait",node="{node}"}[5m]))"#.to_string(),
        ),
        (
            MetricName::NETWORK_DROPS.to_string(),
            r#"clamp_max(sum(rate(node_network_receive_drop_total{node="{node}"}[5m]) + rate(node_network_transmit_drop_total{node="{node}"}[5m])) / 100, 1)"#.to_string(),
        ),
        (
            MetricName::KUBELET_ERRORS.to_string(),
            r#"clamp_max(sum(rate(kubelet_runtime_operations_errors_total{node="{node}"}[5m])) / 10, 1)"#.to_string(),
        ),
        (
            MetricName::MEMORY_PRESSURE.to_string(),
            r#"1 - node_memory_MemAvailable_bytes{node="{node}"} / node_memory_MemTotal_bytes{node="{node}"}"#.to_string(),
        ),
        (
            MetricName::CONDITION_FLAPS.to_string(),
            r#"clamp_max(changes(kube_node_status_condition{node="{node}",condition="Ready",status="true"}[1h]) / 5, 1)"#.to_string(),
        ),
    ])
}

fn default_weights() -> BTreeMap<String, f64> {
    healer_lib::scorer::default_weights()
        .into_iter()
        .map(|(metric, weight)| (metric.to_string(), weight))
        .collect()
}

fn default_policies() -> Vec<PolicySettings> {
    vec![PolicySettings::default()]
}

fn default_policy_name() -> String {
    "default".to_string()
}

fn default_unhealthy_score() -> f64 {
    0.8
}

fn default_evaluation_window() -> u64 {
    300
}

fn default_drain_timeout() -> u64 {
    600
}

fn default_cooldown() -> u64 {
    1800
}

fn default_max_concurrent_drains() -> usize {
    1
}

fn default_max_remediation_attempts() -> u32 {
    3
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/node-healer")
}

fn default_cloud_timeout() -> u64 {
    30
}

fn default_pool_label() -> Option<String> {
    Some("node-healer.io/pool".to_string())
}

fn default_requeue() -> u64 {
    300
}

fn default_collection_retry() -> u64 {
    5
}

fn default_collect_timeout() -> u64 {
    30
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    300
}

fn default_drain_poll_interval() -> u64 {
    5
}

impl ControllerConfig {
    /// Load from the file named by `NODE_HEALER_CONFIG` and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// A missing file is fine; every setting has a default
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("HEALER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid controller configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            anyhow::bail!("At least one policy must be configured");
        }
        for metric in self.weights.keys() {
            if !self.prometheus.queries.contains_key(metric) {
                anyhow::bail!("Weighted signal {metric} has no Prometheus query");
            }
        }
        self.resolver()?;
        Ok(())
    }

    pub fn policies(&self) -> Vec<Policy> {
        self.policies.iter().map(PolicySettings::to_policy).collect()
    }

    pub fn resolver(&self) -> Result<StaticPolicyResolver> {
        StaticPolicyResolver::new(self.policies()).context("Invalid policy configuration")
    }

    pub fn scorer(&self) -> Scorer {
        Scorer::new(
            self.weights
                .iter()
                .map(|(metric, weight)| (MetricName::new(metric.clone()), *weight))
                .collect(),
        )
    }

    pub fn queries(&self) -> Vec<(MetricName, String)> {
        self.prometheus
            .queries
            .iter()
            .map(|(metric, query)| (MetricName::new(metric.clone()), query.clone()))
            .collect()
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            default_requeue: Duration::from_secs(self.scheduler.default_requeue_secs),
            collection_retry: Duration::from_secs(self.scheduler.collection_retry_secs),
            collect_timeout: Duration::from_secs(self.scheduler.collect_timeout_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            drain_poll_interval: Duration::from_secs(self.scheduler.drain_poll_interval_secs),
            pool_label: self.cloud.pool_label.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            initial_backoff: Duration::from_secs(self.scheduler.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.scheduler.max_backoff_secs),
            ..SchedulerConfig::default()
        }
    }
}
