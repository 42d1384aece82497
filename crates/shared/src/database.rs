//! PostgreSQL 连接池
//!
//! 启动时按 `database.connect_attempts` 重试建立连接池，数据库晚于服务就绪时不至于直接退出。

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use crate::retry::{RetryPolicy, retry_with_policy};

const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池，瞬时故障按配置退避重试
    #[instrument(skip_all, fields(attempts = config.connect_attempts))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let policy = startup_policy(config);
        let pool = retry_with_policy(
            &policy,
            "database_connect",
            SharedError::is_retryable,
            move || async move {
                pool_options(config)
                    .connect(&config.url)
                    .await
                    .map_err(SharedError::from)
            },
        )
        .await?;

        info!(max_connections = config.max_connections, "数据库连接池已建立");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 往返一次查询，返回耗时
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(started.elapsed())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
}

fn startup_policy(config: &DatabaseConfig) -> RetryPolicy {
    RetryPolicy::with_attempts(
        config.connect_attempts,
        Duration::from_millis(config.connect_backoff_ms),
        MAX_CONNECT_BACKOFF,
    )
}
