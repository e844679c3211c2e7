//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 描述通知通道的指标
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
pub fn describe_metrics() {
    metrics::describe_counter!(
        "notification_frames_total",
        "Total number of frames received from the broker"
    );
    metrics::describe_counter!(
        "notification_frames_dropped_total",
        "Frames dropped before dispatch, labelled by reason"
    );
    metrics::describe_counter!(
        "notifications_dispatched_total",
        "Notifications delivered to listeners"
    );
    metrics::describe_counter!(
        "notification_listener_errors_total",
        "Listener callbacks that failed or panicked"
    );
    metrics::describe_counter!(
        "broker_reconnect_attempts_total",
        "Scheduled broker reconnection attempts"
    );
    metrics::describe_gauge!("broker_connected", "1 when the broker session is established");
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}
