//! 事件发布 API 服务入口
//!
//! 启动 HTTP 服务、定时发布 Worker 和广播分发 Worker。

use std::sync::Arc;

use broadcast_shared::{
    config::{AppConfig, StoreBackend},
    database::Database,
    observability,
};
use event_api::{assemble, build_router};
use event_publishing::{EventStore, MemoryEventStore, PgEventStore};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("event-api-service")?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        store = ?config.store.backend,
        "Starting event-api-service on {}",
        config.server_addr()
    );

    // 选择存储后端
    let (store, database): (Arc<dyn EventStore>, Option<Database>) = match config.store.backend {
        StoreBackend::Memory => {
            warn!("使用内存存储，进程重启后数据丢失");
            let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
            (store, None)
        }
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            let store = PgEventStore::new(db.pool().clone());
            if config.store.run_migrations {
                store.migrate().await?;
                info!("数据库迁移完成");
            }
            let store: Arc<dyn EventStore> = Arc::new(store);
            (store, Some(db))
        }
    };

    let assembly = assemble(&config, store)?;
    let state = match database.clone() {
        Some(db) => assembly.state.with_database(db),
        None => assembly.state,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = assembly.scheduler;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    } else {
        info!("定时发布 Worker 已禁用");
        None
    };

    let broadcast_worker = assembly.broadcast_worker;
    let worker_rx = shutdown_rx.clone();
    let broadcast_handle = tokio::spawn(async move { broadcast_worker.run(worker_rx).await });

    let app = build_router(state, &config.server);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：收到 SIGTERM 或 Ctrl+C 后停止接收新连接并等待已有请求完成
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // HTTP 停止后通知后台 Worker，等待在途分发结束
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "定时发布 Worker 异常退出");
        }
    }
    if let Err(e) = broadcast_handle.await {
        error!(error = %e, "广播 Worker 异常退出");
    }

    if let Some(db) = database {
        db.close().await;
    }

    served?;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// 信号处理器注册失败时只记录日志，对应的分支永不触发
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
