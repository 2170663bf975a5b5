use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use metrics_webhook::config::Config;
use metrics_webhook::controller::shutdown_channel;
use metrics_webhook::server::{ReportHandler, WebhookServer};
use metrics_webhook::setup_logging;

/// Webhook receiver entrypoint: serves the report endpoint and logs every
/// notification it decodes.
#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("warning: failed to load config: {err}");
        Config::default()
    });

    setup_logging(&config.log_level, &config.log_format)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting metrics webhook receiver"
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let handler: ReportHandler = Arc::new(|report| {
        for notification in &report {
            info!(%notification, "metric notification");
        }
    });

    let server = WebhookServer::new(config.server.clone(), handler);
    server.run(shutdown_rx).await?;

    info!("webhook server stopped");
    Ok(())
}
