//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了后台定时刷新任务，按固定间隔重建集合缓存。

use crate::error::{CacheError, Result};
use crate::keyspace::CollectionId;
use crate::manager::CacheManager;
use crate::model::{CollectionSource, Mongoclass};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 刷新任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Running,
    Stopped,
}

/// 刷新任务的运行统计
#[derive(Debug, Clone)]
pub struct RefreshStatus {
    pub state: RefreshState,
    /// 已执行的刷新次数（含失败）
    pub ticks: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    /// 最近一次成功刷新写入的记录数
    pub last_record_count: Option<usize>,
    pub last_error: Option<String>,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            state: RefreshState::Running,
            ticks: 0,
            failures: 0,
            consecutive_failures: 0,
            last_success_at: None,
            last_record_count: None,
            last_error: None,
        }
    }
}

/// 刷新任务句柄
///
/// 句柄被丢弃时任务停止；调用 [`RefreshHandle::detach`] 后任务随进程一直运行。
#[must_use = "dropping a RefreshHandle stops the refresh task; call detach() to keep it running"]
pub struct RefreshHandle {
    collection: CollectionId,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    status: Arc<RwLock<RefreshStatus>>,
    detached: bool,
}

impl std::fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshHandle")
            .field("collection", &self.collection)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RefreshHandle {
    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 当前统计的快照
    pub async fn status(&self) -> RefreshStatus {
        self.status.read().await.clone()
    }

    /// 停止任务并等待其退出
    ///
    /// 正在进行的重建会先完成，不会留下半写入的列表
    pub async fn stop(mut self) -> RefreshStatus {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!("Refresh task for {} ended abnormally: {}", self.collection, e);
            }
        }
        let mut status = self.status.write().await;
        status.state = RefreshState::Stopped;
        status.clone()
    }

    /// 放弃句柄，任务继续运行直到进程退出
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel.cancel();
        }
    }
}

/// 第 n 次连续失败后的重试等待时间，不超过刷新间隔
fn retry_delay(base_ms: u64, consecutive_failures: u32, interval: Duration) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms).min(interval)
}

/// 启动后台刷新
///
/// 立即执行第一次重建，之后每隔 `interval` 重建一次
pub fn start_periodic<T, S>(
    manager: Arc<CacheManager>,
    source: Arc<S>,
    interval: Duration,
) -> Result<RefreshHandle>
where
    T: Mongoclass,
    S: CollectionSource + ?Sized + 'static,
{
    start_periodic_after::<T, S>(manager, source, interval, Duration::ZERO)
}

/// 启动后台刷新，第一次重建在 `initial_delay` 之后
///
/// 刷新失败只记录日志并按指数退避重试，不会终止循环
pub fn start_periodic_after<T, S>(
    manager: Arc<CacheManager>,
    source: Arc<S>,
    interval: Duration,
    initial_delay: Duration,
) -> Result<RefreshHandle>
where
    T: Mongoclass,
    S: CollectionSource + ?Sized + 'static,
{
    if interval.is_zero() {
        return Err(CacheError::Configuration(
            "refresh interval must be greater than zero".to_string(),
        ));
    }

    let collection = CollectionId::of::<T>();
    let cancel = CancellationToken::new();
    let status = Arc::new(RwLock::new(RefreshStatus::default()));
    let backoff_ms = manager.config().refresh.retry_backoff_ms;

    let task_cancel = cancel.clone();
    let task_status = status.clone();
    let task_collection = collection.clone();

    info!(
        "Starting periodic refresh for {} every {:?}",
        collection, interval
    );

    let join = tokio::spawn(async move {
        let mut delay = initial_delay;
        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if task_cancel.is_cancelled() {
                break;
            }

            let outcome = manager.cache::<T, S>(source.as_ref()).await;

            let mut status = task_status.write().await;
            status.ticks += 1;
            match outcome {
                Ok(count) => {
                    status.consecutive_failures = 0;
                    status.last_success_at = Some(Utc::now());
                    status.last_record_count = Some(count);
                    status.last_error = None;
                    delay = interval;
                    debug!("Periodic refresh of {} wrote {} records", task_collection, count);
                }
                Err(e) => {
                    status.failures += 1;
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(e.to_string());
                    delay = retry_delay(backoff_ms, status.consecutive_failures, interval);
                    warn!(
                        "Periodic refresh of {} failed ({} in a row), retrying in {:?}: {}",
                        task_collection, status.consecutive_failures, delay, e
                    );
                }
            }
        }

        task_status.write().await.state = RefreshState::Stopped;
        info!("Periodic refresh for {} stopped", task_collection);
    });

    Ok(RefreshHandle {
        collection,
        cancel,
        join: Some(join),
        status,
        detached: false,
    })
}
