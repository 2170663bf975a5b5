//! # Metrics Webhook
//!
//! A closed-loop controller that watches per-workload metrics, detects
//! threshold violations and notifies user-supplied webhooks with alert and
//! cooldown reports. On the receiving side, an [`correlator::AdjustmentCorrelator`]
//! can learn how configuration changes move metrics and answer future alerts
//! with a computed adjustment instead of a guess.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ┌───────────────────┐    ┌──────────────────┐
//! │  Controller  │    │    Reconciler     │    │  Webhook target  │
//! │              │    │                   │    │                  │
//! │ • requeue    │────│ • scrape metrics  │────│ • WebhookServer  │
//! │ • shutdown   │    │ • diff statuses   │    │ • Adjustment-    │
//! │ • per-key    │    │ • build report    │    │   Correlator     │
//! │   serialism  │    │ • resolve + POST  │    │                  │
//! └──────────────┘    └───────────────────┘    └──────────────────┘
//! ```
//!
//! The cluster, metrics backend, event sink and HTTP delivery are all
//! capabilities injected through traits, so the control loop is testable
//! without any live infrastructure.

pub mod api;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod measurement_client;
pub mod measurements;
pub mod notification;
pub mod quantity;
pub mod reconciler;
pub mod resolver;
pub mod server;

pub use api::{MetricReport, MetricWebhook};
pub use correlator::AdjustmentCorrelator;
pub use quantity::Quantity;

/// Core error type shared by every component.
///
/// Components return typed errors and never log at their own level; the
/// reconciler owns the top-level error and surfaces it through events on the
/// watched resource.
#[derive(Debug, thiserror::Error)]
pub enum MetricsWebhookError {
    #[error("configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("invalid quantity '{value}': {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("invalid metric source: {0}")]
    InvalidMetricSource(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("metrics source error: {0}")]
    MetricsSource(String),

    #[error("missing request for {resource} on pod {pod}")]
    MissingResourceRequest { resource: String, pod: String },

    #[error("failed to fetch webhook service {namespace}/{name}: not found")]
    ServiceNotFound { namespace: String, name: String },

    #[error("webhook service does not expose required port {port} (available = {available:?})")]
    PortNotExposed { port: i32, available: Vec<i32> },

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected webhook response: status = {status}, body = {body}")]
    WebhookResponse { status: u16, body: String },

    #[error("i/o error: {0}")]
    Io(Box<std::io::Error>),

    #[error("serialization error: {0}")]
    Serialization(Box<serde_json::Error>),

    #[error("logging setup error: {0}")]
    Logging(String),
}

// Manual From implementations so large variants stay boxed.

impl From<figment::Error> for MetricsWebhookError {
    fn from(err: figment::Error) -> Self {
        MetricsWebhookError::Config(Box::new(err))
    }
}

impl From<std::io::Error> for MetricsWebhookError {
    fn from(err: std::io::Error) -> Self {
        MetricsWebhookError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for MetricsWebhookError {
    fn from(err: serde_json::Error) -> Self {
        MetricsWebhookError::Serialization(Box::new(err))
    }
}

/// Result type for metrics-webhook operations.
pub type Result<T> = std::result::Result<T, MetricsWebhookError>;

/// Initialize logging with an environment filter.
///
/// `RUST_LOG` takes precedence over the configured level. `format` accepts
/// `pretty` (default) or `json`.
pub fn setup_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| MetricsWebhookError::Logging(e.to_string()))
}
