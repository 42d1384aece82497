//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "event_mutations_total",
        "Total number of event store mutations by operation and outcome"
    );
    metrics::describe_counter!(
        "moderation_decisions_total",
        "Total number of moderation decisions"
    );
    metrics::describe_counter!(
        "scheduler_fired_total",
        "Total number of scheduled events promoted to broadcasting"
    );
    metrics::describe_counter!(
        "channel_deliveries_total",
        "Total number of channel delivery attempts by outcome"
    );
    metrics::describe_histogram!(
        "channel_send_duration_seconds",
        "Channel adapter send latency in seconds"
    );
    metrics::describe_counter!(
        "broadcast_completions_total",
        "Total number of broadcast rounds by final status"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last background worker iteration"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
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

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录事件存储变更
#[inline]
pub fn record_event_mutation(operation: &str, outcome: &str) {
    metrics::counter!(
        "event_mutations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录审核决定
#[inline]
pub fn record_moderation(decision: &str) {
    metrics::counter!(
        "moderation_decisions_total",
        "decision" => decision.to_string()
    )
    .increment(1);
}

/// 记录定时触发
#[inline]
pub fn record_scheduler_fired(count: u64) {
    metrics::counter!("scheduler_fired_total").increment(count);
}

/// 记录单次渠道发送
#[inline]
pub fn record_channel_delivery(channel: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "channel_deliveries_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "channel_send_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录广播轮次结束
#[inline]
pub fn record_broadcast_completion(status: &str) {
    metrics::counter!(
        "broadcast_completions_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 更新后台 worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
