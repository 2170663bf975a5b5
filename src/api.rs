//! The MetricWebhook resource model and the webhook wire types.
//!
//! In-memory, metric sources and statuses are sum types so the "exactly one
//! of pods/resource" rule is unrepresentable as invalid state; on the wire
//! they keep the `{"type": ..., "pods": ...}` / `{"type": ..., "resource":
//! ...}` shape so existing receivers keep decoding reports unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// Namespace/name pair identifying one MetricWebhook resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
}

/// The MetricWebhook custom resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWebhook {
    pub metadata: ObjectMeta,
    pub spec: MetricWebhookSpec,
    #[serde(default)]
    pub status: MetricWebhookStatus,
}

impl MetricWebhook {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}

/// Desired state: which pods to watch, which thresholds to check and where
/// to send reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricWebhookSpec {
    /// Selects the pods whose metrics are scraped.
    pub selector: LabelSelector,
    /// The web endpoint that receives metric reports.
    pub webhook: WebhookSpec,
    /// Metric thresholds that trigger the webhook.
    pub metrics: Vec<MetricSpec>,
    /// How frequently to scrape metrics, e.g. `"30s"`.
    #[serde(with = "duration_str")]
    pub scrape_interval: Duration,
    /// Send cooldown notifications when a previously alerting metric
    /// returns below its target.
    #[serde(default)]
    pub cooldown_alert: bool,
}

/// A label-equality selector over pods in the resource's namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

/// Where to deliver reports. Resolution precedence is `url`, then `service`,
/// then per-pod fan-out by the resource's selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    /// Explicit endpoint; wins over everything else when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Named service in the resource's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Port the receiver serves on; must be exposed by the service when one
    /// is named.
    pub port: i32,
    /// URL path appended to resolved endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One metric threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MetricSpec {
    Pods { pods: PodsMetricSource },
    Resource { resource: ResourceMetricSource },
}

impl MetricSpec {
    pub fn name(&self) -> &str {
        match self {
            MetricSpec::Pods { pods } => &pods.name,
            MetricSpec::Resource { resource } => &resource.name,
        }
    }
}

/// A custom metric averaged across the selected pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodsMetricSource {
    pub name: String,
    pub target_average_value: Quantity,
}

/// A built-in resource metric (`cpu`, `memory`) averaged across the selected
/// pods. At least one of the two targets must be set; when both are, the
/// value target takes precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_utilization: Option<i32>,
}

/// Observed state mirror written back to the resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricWebhookStatus {
    /// Last scrape wall-clock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scrape_time: Option<DateTime<Utc>>,
    /// Last read state of every configured metric.
    #[serde(default)]
    pub metrics: Vec<MetricStatus>,
}

/// Last-read state of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStatus {
    #[serde(flatten)]
    pub source: MetricStatusSource,
    /// Whether the current value strictly exceeds its target.
    pub alerting: bool,
    pub scrape_time: DateTime<Utc>,
}

impl MetricStatus {
    pub fn name(&self) -> &str {
        match &self.source {
            MetricStatusSource::Pods { pods } => &pods.name,
            MetricStatusSource::Resource { resource } => &resource.name,
        }
    }

    pub fn metric_type(&self) -> MetricSourceType {
        match &self.source {
            MetricStatusSource::Pods { .. } => MetricSourceType::Pods,
            MetricStatusSource::Resource { .. } => MetricSourceType::Resource,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MetricStatusSource {
    Pods { pods: PodsMetricStatus },
    Resource { resource: ResourceMetricStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodsMetricStatus {
    pub name: String,
    pub current_average_value: Quantity,
    pub target_average_value: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricStatus {
    pub name: String,
    pub current_average_value: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_average_utilization: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_utilization: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricSourceType {
    Pods,
    Resource,
}

impl fmt::Display for MetricSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSourceType::Pods => f.write_str("Pods"),
            MetricSourceType::Resource => f.write_str("Resource"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    Alert,
    Cooldown,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::Alert => f.write_str("Alert"),
            NotificationType::Cooldown => f.write_str("Cooldown"),
        }
    }
}

/// One entry of a webhook report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricNotification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub metric_type: MetricSourceType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_average_value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_average_utilization: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_average_utilization: Option<i32>,
    pub scrape_time: DateTime<Utc>,
}

impl fmt::Display for MetricNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.name, self.metric_type, self.notification_type)?;
        if let Some(current) = &self.current_average_value {
            write!(f, " value={current}")?;
            if let Some(target) = &self.target_average_value {
                write!(f, "/{target}")?;
            }
        }
        if let Some(current) = self.current_average_utilization {
            write!(f, " utilization={current}%")?;
            if let Some(target) = self.target_average_utilization {
                write!(f, "/{target}%")?;
            }
        }
        Ok(())
    }
}

/// Ordered notifications for one reconcile; empty means nothing to send.
pub type MetricReport = Vec<MetricNotification>;

/// Serde adapter for humantime duration strings (`"30s"`, `"2m"`).
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
