mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;

use common::{quantity, sample_resource, url_webhook, FakeCluster, FixedMeasurements, InMemoryResources, RecordingEvents};
use metrics_webhook::api::{
    MetricNotification, MetricReport, MetricSourceType, NotificationType, ResourceKey,
};
use metrics_webhook::notification::{NotificationClient, ReportSink};
use metrics_webhook::reconciler::Reconciler;
use metrics_webhook::server::{ReportHandler, WebhookServer, WebhookServerConfig};
use metrics_webhook::MetricsWebhookError;

fn alert_report() -> MetricReport {
    vec![MetricNotification {
        notification_type: NotificationType::Alert,
        metric_type: MetricSourceType::Pods,
        name: "qps".to_string(),
        current_average_value: Some(quantity("120")),
        target_average_value: Some(quantity("100")),
        current_average_utilization: None,
        target_average_utilization: None,
        scrape_time: Utc::now(),
    }]
}

/// Starts the crate's own receiver on an ephemeral port. Returns its base
/// URL, the reports it accepts and the shutdown handle keeping it alive.
async fn start_receiver() -> (
    String,
    Arc<Mutex<Vec<MetricReport>>>,
    tokio::sync::watch::Sender<bool>,
) {
    let received: Arc<Mutex<Vec<MetricReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: ReportHandler = Arc::new(move |report| {
        sink.lock().unwrap().push(report);
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = WebhookServer::new(WebhookServerConfig::default(), handler);
    let (shutdown_tx, shutdown_rx) = metrics_webhook::controller::shutdown_channel();
    tokio::spawn(async move {
        server.run_with_listener(listener, shutdown_rx).await.unwrap();
    });

    (format!("http://{addr}"), received, shutdown_tx)
}

#[tokio::test]
async fn test_notify_delivers_wire_format() {
    let (base, received, _shutdown) = start_receiver().await;
    let client = NotificationClient::new().unwrap();

    client
        .notify(&format!("{base}/metrics-webhook"), &alert_report())
        .await
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let notification = &received[0][0];
    assert_eq!(notification.notification_type, NotificationType::Alert);
    assert_eq!(notification.metric_type, MetricSourceType::Pods);
    assert_eq!(notification.name, "qps");
    assert_eq!(notification.current_average_value, Some(quantity("120")));
    assert_eq!(notification.target_average_value, Some(quantity("100")));
}

#[tokio::test]
async fn test_notify_surfaces_failure_status_and_body() {
    let router = Router::new().route(
        "/h",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database on fire") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = NotificationClient::new().unwrap();
    let err = client
        .notify(&format!("http://{addr}/h"), &alert_report())
        .await
        .unwrap_err();

    match err {
        MetricsWebhookError::WebhookResponse { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("database on fire"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_notify_rejects_unreachable_endpoint() {
    let client = NotificationClient::with_timeout(Duration::from_millis(500)).unwrap();

    // Nothing listens on this port.
    let err = client
        .notify("http://127.0.0.1:1/h", &alert_report())
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsWebhookError::Http(_)));
}

#[tokio::test]
async fn test_reconcile_delivers_to_live_receiver() {
    let (base, received, _shutdown) = start_receiver().await;

    let resources = Arc::new(InMemoryResources::new(sample_resource(
        url_webhook(&format!("{base}/metrics-webhook")),
        false,
    )));
    let events = Arc::new(RecordingEvents::default());
    let reconciler = Reconciler::new(
        resources,
        Arc::new(FixedMeasurements::pod_value("qps", "120")),
        Arc::new(FakeCluster::default()),
        Arc::new(NotificationClient::new().unwrap()),
        events.clone(),
    );

    reconciler
        .reconcile(&ResourceKey::new("default", "sample"))
        .await
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0][0].name, "qps");
    assert_eq!(received[0][0].notification_type, NotificationType::Alert);
    assert_eq!(events.count("SucceededReport"), 1);
}
