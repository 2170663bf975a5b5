//! Minimal workload model and the capability traits the control loop needs
//! from its environment. Everything here is injected, so reconciles run
//! against mocks in tests and against a real cluster in production.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::{LabelSelector, MetricWebhook, ResourceKey};
use crate::quantity::Quantity;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Per-container resource requests, keyed by resource name (`cpu`, `memory`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
    /// Assigned pod IP, absent until scheduling completes.
    pub ip: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub ports: Vec<i32>,
}

/// Read access to pods and services in the cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceInfo>>;

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<PodInfo>>;
}

/// Access to the MetricWebhook resources the controller watches.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetches one resource; `None` when it no longer exists.
    async fn get(&self, key: &ResourceKey) -> Result<Option<MetricWebhook>>;

    /// Persists the resource's `.status`. Writes are optimistic; a conflict
    /// surfaces as an error and the next reconcile overwrites.
    async fn update_status(&self, resource: &MetricWebhook) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// Emits events against a watched resource. Implementations must be cheap
/// and non-blocking; the reconciler records events on both success and
/// failure paths.
pub trait EventRecorder: Send + Sync {
    fn event(&self, key: &ResourceKey, event_type: EventType, reason: &str, message: &str);
}

/// Event recorder that forwards to the tracing subscriber, for deployments
/// without an event sink.
#[derive(Debug, Default)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn event(&self, key: &ResourceKey, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => {
                tracing::info!(resource = %key, reason, message, "event")
            }
            EventType::Warning => {
                tracing::warn!(resource = %key, reason, message, "event")
            }
        }
    }
}
