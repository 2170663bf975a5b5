//! One reconcile: fetch the resource, scrape its metrics, diff against the
//! previous round, report to the resolved webhooks and schedule the next
//! pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::{
    LabelSelector, MetricNotification, MetricReport, MetricSourceType, MetricSpec, MetricStatus,
    MetricStatusSource, MetricWebhook, NotificationType, PodsMetricStatus, ResourceKey,
    ResourceMetricStatus,
};
use crate::cluster::{ClusterClient, EventRecorder, EventType, ResourceClient};
use crate::measurement_client::MeasurementClient;
use crate::notification::ReportSink;
use crate::resolver::WebhookResolver;
use crate::{MetricsWebhookError, Result};

/// What the harness should do once a reconcile returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    pub fn requeue_after(interval: Duration) -> Self {
        Action {
            requeue_after: Some(interval),
        }
    }

    /// Stop watching; the resource is gone.
    pub fn done() -> Self {
        Action {
            requeue_after: None,
        }
    }
}

pub struct Reconciler {
    resources: Arc<dyn ResourceClient>,
    measurements: Arc<dyn MeasurementClient>,
    resolver: WebhookResolver,
    sink: Arc<dyn ReportSink>,
    events: Arc<dyn EventRecorder>,
}

impl Reconciler {
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        measurements: Arc<dyn MeasurementClient>,
        cluster: Arc<dyn ClusterClient>,
        sink: Arc<dyn ReportSink>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Reconciler {
            resources,
            measurements,
            resolver: WebhookResolver::new(cluster),
            sink,
            events,
        }
    }

    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Action> {
        let mut resource = match self.resources.get(key).await? {
            Some(resource) => resource,
            None => {
                debug!(resource = %key, "resource is gone, dropping from the queue");
                return Ok(Action::done());
            }
        };

        let outcome = self.reconcile_resource(&mut resource).await;

        // The mutated status persists on every exit path; a failed save is
        // reported but never overrides the primary outcome.
        if let Err(err) = self.resources.update_status(&resource).await {
            self.events
                .event(key, EventType::Warning, "FailedSaveStatus", &err.to_string());
            warn!(resource = %key, error = %err, "failed to update status");
        }

        outcome
    }

    async fn reconcile_resource(&self, resource: &mut MetricWebhook) -> Result<Action> {
        let key = resource.key();
        let namespace = resource.metadata.namespace.clone();

        let current = match self.fetch_current_metrics(resource, &namespace).await {
            Ok(current) => current,
            Err(err) => {
                self.events
                    .event(&key, EventType::Warning, "FailedFetchMetrics", &err.to_string());
                return Err(err);
            }
        };

        let previous = resource.status.metrics.clone();
        resource.status.metrics = current.clone();
        resource.status.last_scrape_time = Some(Utc::now());

        let (improved, alerting) = diff_metrics(&previous, &current);
        let report = build_report(&alerting, &improved, resource.spec.cooldown_alert);
        self.post_report_events(&key, &report);

        if !report.is_empty() {
            self.send_report(resource, &key, &namespace, &report).await?;
        }

        Ok(Action::requeue_after(resource.spec.scrape_interval))
    }

    async fn send_report(
        &self,
        resource: &MetricWebhook,
        key: &ResourceKey,
        namespace: &str,
        report: &MetricReport,
    ) -> Result<()> {
        let urls = match self
            .resolver
            .resolve(&resource.spec.webhook, namespace, &resource.spec.selector)
            .await
        {
            Ok(urls) => urls,
            Err(err) => {
                self.events
                    .event(key, EventType::Warning, "FailedSendReport", &err.to_string());
                return Err(err);
            }
        };

        let mut delivered = 0usize;
        for url in &urls {
            info!(resource = %key, url = %url, notifications = report.len(), "notifying webhook");
            match self.sink.notify(url, report).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    // Delivery is best-effort and per-URL independent.
                    self.events
                        .event(key, EventType::Warning, "FailedSendReport", &err.to_string());
                    warn!(resource = %key, url = %url, error = %err, "failed to notify webhook");
                }
            }
        }

        if delivered > 0 {
            self.events.event(
                key,
                EventType::Normal,
                "SucceededReport",
                &format!(
                    "delivered {} notification(s) to {}/{} endpoint(s)",
                    report.len(),
                    delivered,
                    urls.len()
                ),
            );
        }
        Ok(())
    }

    async fn fetch_current_metrics(
        &self,
        resource: &MetricWebhook,
        namespace: &str,
    ) -> Result<Vec<MetricStatus>> {
        let mut statuses = Vec::with_capacity(resource.spec.metrics.len());
        for spec in &resource.spec.metrics {
            statuses.push(
                self.fetch_current_metric(spec, namespace, &resource.spec.selector)
                    .await?,
            );
        }
        Ok(statuses)
    }

    async fn fetch_current_metric(
        &self,
        spec: &MetricSpec,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<MetricStatus> {
        match spec {
            MetricSpec::Pods { pods } => {
                let (current, scrape_time) = self
                    .measurements
                    .pod_average_value(&pods.name, namespace, selector, &pods.target_average_value)
                    .await?;

                // Strictly greater than target; equality is not alerting.
                let alerting = current > pods.target_average_value;
                Ok(MetricStatus {
                    source: MetricStatusSource::Pods {
                        pods: PodsMetricStatus {
                            name: pods.name.clone(),
                            current_average_value: current,
                            target_average_value: pods.target_average_value.clone(),
                        },
                    },
                    alerting,
                    scrape_time,
                })
            }
            MetricSpec::Resource { resource: source } => {
                if let Some(target_value) = &source.target_average_value {
                    // The value target takes precedence when both are set.
                    let (current, scrape_time) = self
                        .measurements
                        .resource_average_value(&source.name, namespace, selector, target_value)
                        .await?;

                    let alerting = current > *target_value;
                    Ok(MetricStatus {
                        source: MetricStatusSource::Resource {
                            resource: ResourceMetricStatus {
                                name: source.name.clone(),
                                current_average_value: current,
                                target_average_value: Some(target_value.clone()),
                                current_average_utilization: None,
                                target_average_utilization: source.target_average_utilization,
                            },
                        },
                        alerting,
                        scrape_time,
                    })
                } else if let Some(target_utilization) = source.target_average_utilization {
                    let (current_utilization, raw_average, scrape_time) = self
                        .measurements
                        .resource_average_utilization(
                            &source.name,
                            namespace,
                            selector,
                            target_utilization,
                        )
                        .await?;

                    let alerting = current_utilization > target_utilization;
                    Ok(MetricStatus {
                        source: MetricStatusSource::Resource {
                            resource: ResourceMetricStatus {
                                name: source.name.clone(),
                                current_average_value: raw_average,
                                target_average_value: None,
                                current_average_utilization: Some(current_utilization),
                                target_average_utilization: Some(target_utilization),
                            },
                        },
                        alerting,
                        scrape_time,
                    })
                } else {
                    Err(MetricsWebhookError::InvalidMetricSource(
                        "neither a utilization target nor a value target set".to_string(),
                    ))
                }
            }
        }
    }

    fn post_report_events(&self, key: &ResourceKey, report: &MetricReport) {
        let mut alerts = Vec::new();
        let mut cooldowns = Vec::new();
        for notification in report {
            match notification.notification_type {
                NotificationType::Alert => alerts.push(notification.to_string()),
                NotificationType::Cooldown => cooldowns.push(notification.to_string()),
            }
        }

        if !alerts.is_empty() {
            self.events
                .event(key, EventType::Normal, "NewAlerts", &alerts.join(", "));
        }
        if !cooldowns.is_empty() {
            self.events
                .event(key, EventType::Normal, "NewCooldowns", &cooldowns.join(", "));
        }
    }
}

/// Splits the current statuses into improved (alerting last round, quiet
/// now) and alerting metrics. Previous and current rounds are keyed
/// independently by metric name; a metric lands in at most one group.
pub fn diff_metrics(
    previous: &[MetricStatus],
    current: &[MetricStatus],
) -> (Vec<MetricStatus>, Vec<MetricStatus>) {
    let previous_by_name: HashMap<&str, &MetricStatus> =
        previous.iter().map(|metric| (metric.name(), metric)).collect();

    let mut improved = Vec::new();
    let mut alerting = Vec::new();
    for metric in current {
        if metric.alerting {
            alerting.push(metric.clone());
        } else if previous_by_name
            .get(metric.name())
            .is_some_and(|previous| previous.alerting)
        {
            improved.push(metric.clone());
        }
    }

    (improved, alerting)
}

/// Alert notifications for every alerting metric, plus cooldown
/// notifications for the improved ones when enabled.
pub fn build_report(
    alerting: &[MetricStatus],
    improved: &[MetricStatus],
    cooldown_alert: bool,
) -> MetricReport {
    let mut report = MetricReport::new();
    for metric in alerting {
        report.push(notification_for(NotificationType::Alert, metric));
    }
    if cooldown_alert {
        for metric in improved {
            report.push(notification_for(NotificationType::Cooldown, metric));
        }
    }
    report
}

fn notification_for(notification_type: NotificationType, metric: &MetricStatus) -> MetricNotification {
    match &metric.source {
        MetricStatusSource::Pods { pods } => MetricNotification {
            notification_type,
            metric_type: MetricSourceType::Pods,
            name: pods.name.clone(),
            current_average_value: Some(pods.current_average_value.clone()),
            target_average_value: Some(pods.target_average_value.clone()),
            current_average_utilization: None,
            target_average_utilization: None,
            scrape_time: metric.scrape_time,
        },
        MetricStatusSource::Resource { resource } => MetricNotification {
            notification_type,
            metric_type: MetricSourceType::Resource,
            name: resource.name.clone(),
            current_average_value: Some(resource.current_average_value.clone()),
            target_average_value: resource.target_average_value.clone(),
            current_average_utilization: resource.current_average_utilization,
            target_average_utilization: resource.target_average_utilization,
            scrape_time: metric.scrape_time,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;

    fn pods_status(name: &str, current: &str, target: &str, alerting: bool) -> MetricStatus {
        MetricStatus {
            source: MetricStatusSource::Pods {
                pods: PodsMetricStatus {
                    name: name.to_string(),
                    current_average_value: Quantity::parse(current).unwrap(),
                    target_average_value: Quantity::parse(target).unwrap(),
                },
            },
            alerting,
            scrape_time: Utc::now(),
        }
    }

    #[test]
    fn test_diff_classifies_improved_and_alerting() {
        let previous = vec![
            pods_status("improving", "120", "100", true),
            pods_status("still-hot", "130", "100", true),
            pods_status("calm", "50", "100", false),
        ];
        let current = vec![
            pods_status("improving", "80", "100", false),
            pods_status("still-hot", "140", "100", true),
            pods_status("calm", "60", "100", false),
            pods_status("newcomer", "150", "100", true),
        ];

        let (improved, alerting) = diff_metrics(&previous, &current);

        let improved_names: Vec<&str> = improved.iter().map(MetricStatus::name).collect();
        let alerting_names: Vec<&str> = alerting.iter().map(MetricStatus::name).collect();
        assert_eq!(improved_names, vec!["improving"]);
        assert_eq!(alerting_names, vec!["still-hot", "newcomer"]);
    }

    #[test]
    fn test_diff_partitions_each_metric_once() {
        let previous = vec![
            pods_status("a", "120", "100", true),
            pods_status("b", "90", "100", false),
        ];
        let current = vec![
            pods_status("a", "80", "100", false),
            pods_status("b", "130", "100", true),
            pods_status("c", "40", "100", false),
        ];

        let (improved, alerting) = diff_metrics(&previous, &current);

        for metric in &current {
            let in_improved = improved.iter().filter(|m| m.name() == metric.name()).count();
            let in_alerting = alerting.iter().filter(|m| m.name() == metric.name()).count();
            assert!(
                in_improved + in_alerting <= 1,
                "{} classified more than once",
                metric.name()
            );
        }
    }

    #[test]
    fn test_cooldown_gate() {
        let improved = vec![pods_status("qps", "80", "100", false)];

        let muted = build_report(&[], &improved, false);
        assert!(muted.is_empty());

        let report = build_report(&[], &improved, true);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].notification_type, NotificationType::Cooldown);
        assert_eq!(report[0].name, "qps");
    }

    #[test]
    fn test_report_orders_alerts_before_cooldowns() {
        let alerting = vec![pods_status("hot", "130", "100", true)];
        let improved = vec![pods_status("cool", "80", "100", false)];

        let report = build_report(&alerting, &improved, true);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].notification_type, NotificationType::Alert);
        assert_eq!(report[0].name, "hot");
        assert_eq!(report[1].notification_type, NotificationType::Cooldown);
        assert_eq!(report[1].name, "cool");
    }

    #[test]
    fn test_notification_carries_targets_through() {
        let status = MetricStatus {
            source: MetricStatusSource::Resource {
                resource: ResourceMetricStatus {
                    name: "cpu".to_string(),
                    current_average_value: Quantity::parse("850m").unwrap(),
                    target_average_value: None,
                    current_average_utilization: Some(85),
                    target_average_utilization: Some(80),
                },
            },
            alerting: true,
            scrape_time: Utc::now(),
        };

        let report = build_report(&[status], &[], false);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].metric_type, MetricSourceType::Resource);
        assert_eq!(report[0].current_average_utilization, Some(85));
        assert_eq!(report[0].target_average_utilization, Some(80));
        assert!(report[0].target_average_value.is_none());
    }
}
