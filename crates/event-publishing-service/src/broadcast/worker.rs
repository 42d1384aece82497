//! 广播受理与后台分发
//!
//! [`BroadcastService`] 同步校验并受理广播请求，受理后立即返回；
//! [`BroadcastWorker`] 在后台执行分发，触发来源有三个：
//!
//! - 受理队列：已在 broadcasting 的事件追加渠道
//! - 领域事件总线：任何进入 broadcasting 的迁移（审核通过、定时触发、重新广播）
//! - 兜底扫描：周期性扫描 broadcasting 事件，接管租约过期的渠道

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use broadcast_shared::config::BroadcastConfig;
use broadcast_shared::observability::metrics;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::dispatcher::BroadcastDispatcher;
use crate::bus::DomainEventKind;
use crate::error::{EventError, Result};
use crate::models::{AuditAction, AuditEntry, ChannelName, EventQuery, EventStatus};
use crate::service::{EventService, ensure_version, transitioned};

/// 分发任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastJob {
    pub event_id: Uuid,
    /// 为空表示使用事件自身的渠道
    pub channels: BTreeSet<ChannelName>,
}

/// 受理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub event_id: Uuid,
    /// 本次将要分发的渠道
    pub channels: Vec<ChannelName>,
    /// 受理后的事件状态
    pub status: EventStatus,
    /// 是否产生了新的分发；请求的渠道都已成功时为 false
    pub queued: bool,
}

/// 创建受理端与后台 worker
pub fn broadcast_pipeline(
    dispatcher: BroadcastDispatcher,
    config: &BroadcastConfig,
) -> (BroadcastService, BroadcastWorker) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let service = BroadcastService {
        events: dispatcher.events().clone(),
        jobs: tx,
    };
    let worker = BroadcastWorker {
        dispatcher,
        jobs: rx,
        concurrency: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
        sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
    };
    (service, worker)
}

/// 广播受理
#[derive(Clone)]
pub struct BroadcastService {
    events: EventService,
    jobs: mpsc::Sender<BroadcastJob>,
}

impl BroadcastService {
    /// 受理广播请求
    ///
    /// - broadcasting：直接入队分发
    /// - broadcasted / failed：只重发尚未成功的渠道，开启新一轮
    /// - 其他状态：`InvalidState`
    #[instrument(skip(self, channels), fields(event_id = %id))]
    pub async fn request_broadcast(
        &self,
        id: Uuid,
        channels: BTreeSet<ChannelName>,
        expected_version: Option<i64>,
        actor: Option<Uuid>,
    ) -> Result<Admission> {
        let current = self.events.get(id).await?;
        ensure_version(&current, expected_version)?;

        let requested = if channels.is_empty() {
            current.channels.clone()
        } else {
            channels
        };
        if requested.is_empty() {
            return Err(EventError::Validation(
                "事件没有可广播的渠道".to_string(),
            ));
        }

        let admission = match current.status {
            EventStatus::Broadcasting => {
                self.enqueue(BroadcastJob {
                    event_id: id,
                    channels: requested.clone(),
                })
                .await?;
                Admission {
                    event_id: id,
                    channels: requested.into_iter().collect(),
                    status: EventStatus::Broadcasting,
                    queued: true,
                }
            }
            EventStatus::Broadcasted | EventStatus::Failed => {
                let pending = current.pending_channels(&requested);
                if pending.is_empty() {
                    info!(event_id = %id, "请求的渠道均已投递成功，无需重新广播");
                    Admission {
                        event_id: id,
                        channels: Vec::new(),
                        status: current.status,
                        queued: false,
                    }
                } else {
                    let mut next = transitioned(&current, EventStatus::Broadcasting)?;
                    next.channels = pending.clone();
                    // 进入 broadcasting 的领域事件由 worker 接手分发
                    let saved = self
                        .events
                        .commit(
                            &current,
                            next,
                            DomainEventKind::StatusChanged {
                                from: current.status,
                                to: EventStatus::Broadcasting,
                            },
                        )
                        .await?;
                    info!(
                        event_id = %id,
                        round = saved.broadcast_round,
                        channels = ?pending,
                        "重新广播已受理"
                    );
                    Admission {
                        event_id: id,
                        channels: pending.into_iter().collect(),
                        status: saved.status,
                        queued: true,
                    }
                }
            }
            status => {
                return Err(EventError::InvalidState {
                    id,
                    status,
                    operation: "broadcast",
                });
            }
        };

        self.events
            .record_audit(AuditEntry::new(
                id,
                AuditAction::BroadcastRequested,
                actor,
                json!({
                    "from": current.status,
                    "channels": admission.channels,
                    "queued": admission.queued,
                }),
            ))
            .await;
        self.events.touch_feed().await;
        metrics::record_event_mutation("broadcast", "ok");

        Ok(admission)
    }

    async fn enqueue(&self, job: BroadcastJob) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| EventError::Internal("广播队列已关闭".to_string()))
    }
}

/// 后台分发 worker
pub struct BroadcastWorker {
    dispatcher: BroadcastDispatcher,
    jobs: mpsc::Receiver<BroadcastJob>,
    concurrency: Arc<Semaphore>,
    sweep_interval: Duration,
}

impl BroadcastWorker {
    /// 主循环，收到关闭信号后等待进行中的分发结束再返回
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sweep_interval = ?self.sweep_interval,
            concurrency = self.concurrency.available_permits(),
            "BroadcastWorker 已启动"
        );

        let mut bus = self.dispatcher.events().bus().subscribe();
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("BroadcastWorker 收到关闭信号");
                    break;
                }
                Some(job) = self.jobs.recv() => {
                    self.spawn(&mut tasks, job);
                }
                received = bus.recv() => match received {
                    Ok(event) if event.entered_broadcasting() => {
                        debug!(event_id = %event.event_id, "事件进入广播中，开始分发");
                        self.spawn(&mut tasks, BroadcastJob {
                            event_id: event.event_id,
                            channels: BTreeSet::new(),
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "领域事件积压，转为全量扫描");
                        self.sweep(&mut tasks).await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("领域事件总线已关闭");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    self.sweep(&mut tasks).await;
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "分发任务异常退出");
                    }
                }
            }
        }

        let remaining = tasks.len();
        if remaining > 0 {
            info!(remaining, "等待进行中的分发完成");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "分发任务异常退出");
            }
        }
        info!("BroadcastWorker 已停止");
    }

    fn spawn(&self, tasks: &mut JoinSet<()>, job: BroadcastJob) {
        let dispatcher = self.dispatcher.clone();
        let concurrency = self.concurrency.clone();

        tasks.spawn(async move {
            let Ok(_permit) = concurrency.acquire_owned().await else {
                return;
            };
            match dispatcher.dispatch(job.event_id, &job.channels).await {
                Ok(report) => debug!(
                    event_id = %report.event_id,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    status = %report.final_status,
                    "分发结束"
                ),
                Err(e) if e.is_race_lost() => {
                    debug!(event_id = %job.event_id, error = %e, "事件已不在广播中");
                }
                Err(e) => {
                    error!(event_id = %job.event_id, error = %e, "分发失败");
                }
            }
        });
    }

    /// 扫描所有 broadcasting 事件并重新分发
    async fn sweep(&self, tasks: &mut JoinSet<()>) {
        let mut page = 1;
        loop {
            let query = EventQuery::new(
                Some(page),
                Some(EventQuery::MAX_SIZE),
                None,
                Some(EventStatus::Broadcasting),
            );
            let result = match self.dispatcher.events().list(&query).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "扫描广播中事件失败");
                    break;
                }
            };

            for event in &result.items {
                self.spawn(
                    tasks,
                    BroadcastJob {
                        event_id: event.id,
                        channels: BTreeSet::new(),
                    },
                );
            }

            if result.items.is_empty() || query.offset() + result.items.len() as u64 >= result.total
            {
                break;
            }
            page += 1;
        }

        metrics::set_worker_last_run("broadcast_worker");
    }
}
