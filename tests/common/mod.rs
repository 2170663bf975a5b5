//! Shared in-memory doubles for the controller's capability seams.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use metrics_webhook::api::{
    LabelSelector, MetricReport, MetricSpec, MetricWebhook, MetricWebhookSpec,
    MetricWebhookStatus, ObjectMeta, PodsMetricSource, ResourceKey, WebhookSpec,
};
use metrics_webhook::cluster::{
    ClusterClient, EventRecorder, EventType, PodInfo, PodPhase, ResourceClient, ServiceInfo,
};
use metrics_webhook::measurement_client::MeasurementClient;
use metrics_webhook::notification::ReportSink;
use metrics_webhook::quantity::Quantity;
use metrics_webhook::{MetricsWebhookError, Result};

pub fn quantity(s: &str) -> Quantity {
    Quantity::parse(s).unwrap()
}

pub fn url_webhook(url: &str) -> WebhookSpec {
    WebhookSpec {
        url: Some(url.to_string()),
        service: None,
        port: 80,
        path: None,
    }
}

pub fn service_webhook(service: &str, port: i32) -> WebhookSpec {
    WebhookSpec {
        url: None,
        service: Some(service.to_string()),
        port,
        path: None,
    }
}

pub fn fan_out_webhook(port: i32, path: &str) -> WebhookSpec {
    WebhookSpec {
        url: None,
        service: None,
        port,
        path: Some(path.to_string()),
    }
}

/// A `default/sample` resource watching one pods metric (`qps`, target 100).
pub fn sample_resource(webhook: WebhookSpec, cooldown_alert: bool) -> MetricWebhook {
    MetricWebhook {
        metadata: ObjectMeta {
            name: "sample".to_string(),
            namespace: "default".to_string(),
        },
        spec: MetricWebhookSpec {
            selector: LabelSelector::default(),
            webhook,
            metrics: vec![MetricSpec::Pods {
                pods: PodsMetricSource {
                    name: "qps".to_string(),
                    target_average_value: quantity("100"),
                },
            }],
            scrape_interval: Duration::from_secs(30),
            cooldown_alert,
        },
        status: MetricWebhookStatus::default(),
    }
}

pub fn running_pod(name: &str, ip: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        phase: PodPhase::Running,
        ip: Some(ip.to_string()),
        labels: Default::default(),
        containers: Vec::new(),
    }
}

/// Holds one resource and records every status write.
pub struct InMemoryResources {
    resource: Mutex<Option<MetricWebhook>>,
    pub status_updates: Mutex<Vec<MetricWebhookStatus>>,
}

impl InMemoryResources {
    pub fn new(resource: MetricWebhook) -> Self {
        InMemoryResources {
            resource: Mutex::new(Some(resource)),
            status_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        InMemoryResources {
            resource: Mutex::new(None),
            status_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn latest_status(&self) -> MetricWebhookStatus {
        self.status_updates
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a status update was persisted")
    }
}

#[async_trait]
impl ResourceClient for InMemoryResources {
    async fn get(&self, _key: &ResourceKey) -> Result<Option<MetricWebhook>> {
        Ok(self.resource.lock().unwrap().clone())
    }

    async fn update_status(&self, resource: &MetricWebhook) -> Result<()> {
        self.status_updates
            .lock()
            .unwrap()
            .push(resource.status.clone());
        if let Some(stored) = self.resource.lock().unwrap().as_mut() {
            stored.status = resource.status.clone();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCluster {
    pub services: Vec<ServiceInfo>,
    pub pods: Vec<PodInfo>,
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_service(&self, _namespace: &str, name: &str) -> Result<Option<ServiceInfo>> {
        Ok(self.services.iter().find(|s| s.name == name).cloned())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        _selector: &LabelSelector,
    ) -> Result<Vec<PodInfo>> {
        Ok(self.pods.clone())
    }
}

/// Serves fixed averages and counts reads.
#[derive(Default)]
pub struct FixedMeasurements {
    pub pod_values: HashMap<String, Quantity>,
    pub resource_values: HashMap<String, Quantity>,
    pub resource_utilizations: HashMap<String, (i32, Quantity)>,
    pub reads: AtomicUsize,
}

impl FixedMeasurements {
    pub fn pod_value(metric: &str, value: &str) -> Self {
        let mut measurements = FixedMeasurements::default();
        measurements
            .pod_values
            .insert(metric.to_string(), quantity(value));
        measurements
    }
}

#[async_trait]
impl MeasurementClient for FixedMeasurements {
    async fn pod_average_value(
        &self,
        name: &str,
        _namespace: &str,
        _selector: &LabelSelector,
        _target_average_value: &Quantity,
    ) -> Result<(Quantity, chrono::DateTime<Utc>)> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.pod_values.get(name) {
            Some(value) => Ok((value.clone(), Utc::now())),
            None => Err(MetricsWebhookError::MetricsSource(format!(
                "no metrics returned for pod metric {name}"
            ))),
        }
    }

    async fn resource_average_value(
        &self,
        resource: &str,
        _namespace: &str,
        _selector: &LabelSelector,
        _target_average_value: &Quantity,
    ) -> Result<(Quantity, chrono::DateTime<Utc>)> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.resource_values.get(resource) {
            Some(value) => Ok((value.clone(), Utc::now())),
            None => Err(MetricsWebhookError::MetricsSource(format!(
                "no metrics returned for resource {resource}"
            ))),
        }
    }

    async fn resource_average_utilization(
        &self,
        resource: &str,
        _namespace: &str,
        _selector: &LabelSelector,
        _target_average_utilization: i32,
    ) -> Result<(i32, Quantity, chrono::DateTime<Utc>)> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.resource_utilizations.get(resource) {
            Some((utilization, raw)) => Ok((*utilization, raw.clone(), Utc::now())),
            None => Err(MetricsWebhookError::MetricsSource(format!(
                "no metrics returned for resource {resource}"
            ))),
        }
    }
}

/// Records events as `(type, reason, message)` tuples.
#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(EventType, String, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r, _)| r == reason)
            .count()
    }
}

impl EventRecorder for RecordingEvents {
    fn event(&self, _key: &ResourceKey, event_type: EventType, reason: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((event_type, reason.to_string(), message.to_string()));
    }
}

/// Records deliveries and fails for configured URLs.
#[derive(Default)]
pub struct RecordingSink {
    pub posts: Mutex<Vec<(String, MetricReport)>>,
    pub fail_urls: Vec<String>,
}

impl RecordingSink {
    pub fn failing_for(urls: &[&str]) -> Self {
        RecordingSink {
            posts: Mutex::new(Vec::new()),
            fail_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    pub fn posted_urls(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn notify(&self, url: &str, report: &MetricReport) -> Result<()> {
        if self.fail_urls.iter().any(|failing| failing == url) {
            return Err(MetricsWebhookError::WebhookResponse {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), report.clone()));
        Ok(())
    }
}
