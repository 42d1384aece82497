//! 定时发布 Worker
//!
//! 轮询 scheduled 且 `scheduled_at <= now` 的事件，迁移到 broadcasting。
//! 迁移走 CAS，多实例或多次 tick 并发时只有一个能成功，其余静默跳过。
//! 不会提前触发，最多延迟一个轮询间隔。

use std::time::Duration;

use broadcast_shared::config::SchedulerConfig;
use broadcast_shared::observability::metrics;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::EventStatus;
use crate::service::EventService;

pub struct SchedulerWorker {
    events: EventService,
    poll_interval: Duration,
    batch_size: usize,
}

impl SchedulerWorker {
    pub fn new(events: EventService, config: &SchedulerConfig) -> Self {
        Self::with_config(events, config.poll_interval_secs, config.batch_size)
    }

    /// 创建带自定义配置的 Worker（主要用于测试）
    pub fn with_config(events: EventService, poll_secs: u64, batch_size: usize) -> Self {
        Self {
            events,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            batch_size: batch_size.max(1),
        }
    }

    /// 主循环：直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "SchedulerWorker 已启动"
        );

        loop {
            match self.tick(Utc::now()).await {
                Ok(fired) if fired > 0 => metrics::record_scheduler_fired(fired as u64),
                Ok(_) => {}
                Err(e) => error!(error = %e, "定时发布扫描出错"),
            }

            // 供 Prometheus 告警判断 Worker 是否存活
            metrics::set_worker_last_run("scheduler_worker");

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("SchedulerWorker 已停止");
    }

    /// 执行一轮扫描，返回本轮成功触发的事件数
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self
            .events
            .store()
            .list_due_scheduled(now, self.batch_size)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(count = due.len(), "发现到期的定时事件");

        let mut fired = 0;
        for event in due {
            // 存储层已按时间过滤，这里再校验一次
            if event.status != EventStatus::Scheduled
                || event.scheduled_at.is_none_or(|at| at > now)
            {
                continue;
            }

            match self
                .events
                .transition(event.id, EventStatus::Broadcasting, event.version)
                .await
            {
                Ok(_) => {
                    info!(event_id = %event.id, "定时事件已触发");
                    fired += 1;
                }
                Err(e) if e.is_race_lost() => {
                    debug!(event_id = %event.id, error = %e, "定时事件已被其他实例触发");
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "触发定时事件失败");
                }
            }
        }

        Ok(fired)
    }
}
