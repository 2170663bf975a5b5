//! Best-effort HTTP delivery of metric reports.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::{duration_str, MetricReport};
use crate::{MetricsWebhookError, Result};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// How much of a failed response body is carried in the error.
const MAX_ERROR_BODY_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-request timeout for report delivery.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Delivery seam between the reconciler and the network.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn notify(&self, url: &str, report: &MetricReport) -> Result<()>;
}

/// POSTs JSON-encoded reports. No retries; the reconcile loop stays
/// resilient when delivery fails.
pub struct NotificationClient {
    http: reqwest::Client,
}

impl NotificationClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(NotificationClient { http })
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        Self::with_timeout(config.timeout)
    }
}

#[async_trait]
impl ReportSink for NotificationClient {
    async fn notify(&self, url: &str, report: &MetricReport) -> Result<()> {
        let response = self.http.post(url).json(report).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY_BYTES);
            return Err(MetricsWebhookError::WebhookResponse {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

fn truncate_on_char_boundary(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
