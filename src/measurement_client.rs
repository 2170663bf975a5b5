//! Turns raw per-pod samples into the averaged values the reconciler
//! compares against targets.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::LabelSelector;
use crate::cluster::{ClusterClient, PodInfo};
use crate::quantity::Quantity;
use crate::{MetricsWebhookError, Result};

/// Raw samples for one metric: milli-units per pod plus the scrape time.
#[derive(Debug, Clone)]
pub struct PodMetricSamples {
    pub samples: HashMap<String, i64>,
    pub timestamp: DateTime<Utc>,
}

/// The metrics backend: per-pod samples for a named pod metric or for a
/// built-in resource.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn pod_metric(
        &self,
        metric_name: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<PodMetricSamples>;

    async fn resource_metric(
        &self,
        resource: &str,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<PodMetricSamples>;
}

/// The three averaged reads the reconciler needs.
#[async_trait]
pub trait MeasurementClient: Send + Sync {
    /// Average of a custom metric across the selected pods.
    async fn pod_average_value(
        &self,
        name: &str,
        namespace: &str,
        selector: &LabelSelector,
        target_average_value: &Quantity,
    ) -> Result<(Quantity, DateTime<Utc>)>;

    /// Average of a built-in resource metric across the selected pods.
    async fn resource_average_value(
        &self,
        resource: &str,
        namespace: &str,
        selector: &LabelSelector,
        target_average_value: &Quantity,
    ) -> Result<(Quantity, DateTime<Utc>)>;

    /// Average utilization percentage of a built-in resource relative to the
    /// pods' requests, plus the raw average value.
    async fn resource_average_utilization(
        &self,
        resource: &str,
        namespace: &str,
        selector: &LabelSelector,
        target_average_utilization: i32,
    ) -> Result<(i32, Quantity, DateTime<Utc>)>;
}

/// [`MeasurementClient`] over a [`MetricsSource`] and a [`ClusterClient`].
pub struct StandardMeasurementClient<M, C> {
    metrics: M,
    cluster: C,
}

impl<M: MetricsSource, C: ClusterClient> StandardMeasurementClient<M, C> {
    pub fn new(metrics: M, cluster: C) -> Self {
        StandardMeasurementClient { metrics, cluster }
    }

    fn average_milli(samples: &PodMetricSamples, what: &str) -> Result<i64> {
        if samples.samples.is_empty() {
            return Err(MetricsWebhookError::MetricsSource(format!(
                "no metrics returned for {what}"
            )));
        }
        let total: i64 = samples.samples.values().sum();
        Ok(total / samples.samples.len() as i64)
    }
}

#[async_trait]
impl<M: MetricsSource, C: ClusterClient> MeasurementClient for StandardMeasurementClient<M, C> {
    async fn pod_average_value(
        &self,
        name: &str,
        namespace: &str,
        selector: &LabelSelector,
        _target_average_value: &Quantity,
    ) -> Result<(Quantity, DateTime<Utc>)> {
        let samples = self.metrics.pod_metric(name, namespace, selector).await?;
        let average = Self::average_milli(&samples, &format!("pod metric {name}"))?;
        Ok((Quantity::from_milli(average), samples.timestamp))
    }

    async fn resource_average_value(
        &self,
        resource: &str,
        namespace: &str,
        selector: &LabelSelector,
        _target_average_value: &Quantity,
    ) -> Result<(Quantity, DateTime<Utc>)> {
        let samples = self
            .metrics
            .resource_metric(resource, namespace, selector)
            .await?;
        let average = Self::average_milli(&samples, &format!("resource {resource}"))?;
        Ok((Quantity::from_milli(average), samples.timestamp))
    }

    async fn resource_average_utilization(
        &self,
        resource: &str,
        namespace: &str,
        selector: &LabelSelector,
        _target_average_utilization: i32,
    ) -> Result<(i32, Quantity, DateTime<Utc>)> {
        let all_pods = self.cluster.list_pods(namespace, selector).await?;
        let samples = self
            .metrics
            .resource_metric(resource, namespace, selector)
            .await?;

        // Only pods that are running and actually present in the metrics map
        // count towards utilization.
        let eligible: Vec<&PodInfo> = all_pods
            .iter()
            .filter(|pod| pod.is_running() && samples.samples.contains_key(&pod.name))
            .collect();
        if eligible.is_empty() {
            return Err(MetricsWebhookError::MetricsSource(format!(
                "no running pods matched the metrics returned for resource {resource}"
            )));
        }

        let total_request = total_pod_requests(&eligible, resource)?;
        if total_request == 0 {
            return Err(MetricsWebhookError::MetricsSource(format!(
                "zero total request for resource {resource}"
            )));
        }

        let total_usage: i64 = eligible
            .iter()
            .filter_map(|pod| samples.samples.get(&pod.name))
            .sum();

        let utilization = (100 * total_usage / total_request) as i32;
        let raw_average = Quantity::from_milli(total_usage / eligible.len() as i64);
        Ok((utilization, raw_average, samples.timestamp))
    }
}

/// Sums per-container requests for `resource` across `pods`, in milli-units.
/// Every container of every eligible pod must declare a request.
fn total_pod_requests(pods: &[&PodInfo], resource: &str) -> Result<i64> {
    let mut total = 0i64;
    for pod in pods {
        for container in &pod.containers {
            match container.requests.get(resource) {
                Some(request) => total += request.milli_value(),
                None => {
                    return Err(MetricsWebhookError::MissingResourceRequest {
                        resource: resource.to_string(),
                        pod: pod.name.clone(),
                    })
                }
            }
        }
    }
    Ok(total)
}
