//! The receiving side: a small HTTP server that decodes POSTed metric
//! reports and hands them to a callback.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api::{duration_str, MetricReport};
use crate::Result;

pub const DEFAULT_WEBHOOK_PORT: u16 = 4030;
pub const DEFAULT_WEBHOOK_PATH: &str = "/metrics-webhook";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub path: String,
    /// Bound on receiving and answering one request.
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// How long a graceful shutdown may drain before open connections are
    /// aborted.
    #[serde(with = "duration_str")]
    pub shutdown_deadline: Duration,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        WebhookServerConfig {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_WEBHOOK_PORT,
            path: DEFAULT_WEBHOOK_PATH.to_string(),
            request_timeout: Duration::from_secs(15),
            shutdown_deadline: Duration::from_secs(10),
        }
    }
}

/// Invoked once per decoded report.
pub type ReportHandler = Arc<dyn Fn(MetricReport) + Send + Sync>;

pub struct WebhookServer {
    config: WebhookServerConfig,
    handler: ReportHandler,
}

impl WebhookServer {
    pub fn new(config: WebhookServerConfig, handler: ReportHandler) -> Self {
        WebhookServer { config, handler }
    }

    /// The route table: POST on the configured path. Other methods get 405,
    /// malformed bodies 400.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, post(receive_report))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .with_state(self.handler.clone())
    }

    /// Binds the configured address and serves until shutdown is signalled.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serves on an already-bound listener; lets callers pick an ephemeral
    /// port first.
    pub async fn run_with_listener(
        self,
        listener: tokio::net::TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, path = %self.config.path, "webhook server listening");
        }

        let deadline = self.config.shutdown_deadline;
        let router = self.router();

        let mut graceful_signal = shutdown.clone();
        let graceful = async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    wait_for_shutdown(&mut graceful_signal).await;
                })
                .await
        };

        let mut forced_signal = shutdown;
        let forced = async move {
            wait_for_shutdown(&mut forced_signal).await;
            tokio::time::sleep(deadline).await;
        };

        tokio::select! {
            result = graceful => {
                result?;
                info!("webhook server drained");
            }
            _ = forced => {
                warn!("shutdown deadline exceeded, aborting open connections");
            }
        }
        Ok(())
    }
}

async fn wait_for_shutdown(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow() {
        if signal.changed().await.is_err() {
            break;
        }
    }
}

async fn receive_report(State(handler): State<ReportHandler>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<MetricReport>(&body) {
        Ok(report) => {
            debug!(notifications = report.len(), "received metric report");
            handler(report);
            StatusCode::OK
        }
        Err(err) => {
            warn!(error = %err, "rejecting malformed report");
            StatusCode::BAD_REQUEST
        }
    }
}
