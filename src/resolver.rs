//! Resolves a webhook spec into concrete URLs.

use std::sync::Arc;

use crate::api::{LabelSelector, WebhookSpec};
use crate::cluster::ClusterClient;
use crate::{MetricsWebhookError, Result};

/// Turns a [`WebhookSpec`] into zero or more URLs to notify. Precedence:
/// explicit `url`, then `service` (with a port check against the service's
/// declared ports), then fan-out to every running selected pod.
pub struct WebhookResolver {
    cluster: Arc<dyn ClusterClient>,
}

impl WebhookResolver {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        WebhookResolver { cluster }
    }

    pub async fn resolve(
        &self,
        spec: &WebhookSpec,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<String>> {
        let path = spec.path.as_deref().unwrap_or("");

        if let Some(url) = spec.url.as_deref().filter(|url| !url.is_empty()) {
            return Ok(vec![url.to_string()]);
        }

        if let Some(service_name) = spec.service.as_deref().filter(|name| !name.is_empty()) {
            let service = self
                .cluster
                .get_service(namespace, service_name)
                .await?
                .ok_or_else(|| MetricsWebhookError::ServiceNotFound {
                    namespace: namespace.to_string(),
                    name: service_name.to_string(),
                })?;

            if !service.ports.contains(&spec.port) {
                return Err(MetricsWebhookError::PortNotExposed {
                    port: spec.port,
                    available: service.ports,
                });
            }

            return Ok(vec![format!(
                "http://{}.{}.svc.cluster.local:{}{}",
                service.name, namespace, spec.port, path
            )]);
        }

        // Fan out to every running selected pod with an assigned IP. No pods
        // is benign: there is simply no target this round.
        let pods = self.cluster.list_pods(namespace, selector).await?;
        let urls = pods
            .iter()
            .filter(|pod| pod.is_running())
            .filter_map(|pod| pod.ip.as_deref())
            .map(|ip| format!("http://{}:{}{}", ip, spec.port, path))
            .collect();
        Ok(urls)
    }
}
