//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了按 (数据库, 集合) 划分的分布式锁。
//!
//! 锁只能通过 [`ScopedLock`] 持有：显式 `release`，或在出错、取消时由 `Drop` 释放。
//! 锁本身带过期时间，持有期间可以自动续期。

use crate::config::LockConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// 锁后端
///
/// `token` 标识持有者，只有持有者可以释放或续期
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// 尝试获取锁，已被他人持有时返回 false
    async fn try_acquire(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool>;

    /// 释放锁，锁不属于 `token` 时返回 false
    async fn release(&self, name: &str, token: &str) -> Result<bool>;

    /// 延长锁的过期时间，锁已丢失时返回 false
    async fn extend(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool>;
}

/// 锁管理器
///
/// 每次调用都重新获取锁，不在进程内缓存持有状态
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    config: LockConfig,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .finish()
    }
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// 获取锁
    ///
    /// 按 `retry_interval_ms` 轮询直到获取成功。超过 `wait_timeout_ms` 返回
    /// `LockTimeout`，后端不可达返回 `LockUnavailable`。
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(&self, name: &str) -> Result<ScopedLock> {
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let retry = self.config.retry_interval();
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            if self
                .backend
                .try_acquire(name, &token, self.config.ttl_ms)
                .await?
            {
                debug!(
                    "Acquired lock {} after {} attempt(s) in {:?}",
                    name,
                    attempts,
                    started.elapsed()
                );
                return Ok(ScopedLock::new(
                    self.backend.clone(),
                    name.to_string(),
                    token,
                    &self.config,
                ));
            }

            let pause = match self.config.wait_timeout() {
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(CacheError::LockTimeout {
                            name: name.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    retry.min(limit - waited)
                }
                None => retry,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// 在临界区内执行 `f`
    ///
    /// 无论 `f` 成功与否都会释放锁，返回 `f` 的结果。释放失败只记录日志，
    /// 锁会在过期时间后自动失效。
    pub async fn with_lock<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(name).await?;
        let result = f().await;
        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!("Lock {} was lost before release (expired?)", name),
            Err(e) => warn!("Failed to release lock {}: {}", name, e),
        }
        result
    }
}

/// 作用域锁
///
/// 离开作用域时释放锁。在 tokio 运行时之外被丢弃时只能等待锁过期。
pub struct ScopedLock {
    backend: Arc<dyn LockBackend>,
    name: String,
    token: String,
    released: bool,
    renewal: Option<(CancellationToken, JoinHandle<()>)>,
}

impl std::fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

impl ScopedLock {
    fn new(backend: Arc<dyn LockBackend>, name: String, token: String, config: &LockConfig) -> Self {
        let renewal = if config.auto_extend {
            Some(Self::spawn_renewal(
                backend.clone(),
                name.clone(),
                token.clone(),
                config.ttl_ms,
            ))
        } else {
            None
        };

        Self {
            backend,
            name,
            token,
            released: false,
            renewal,
        }
    }

    /// 每隔三分之一过期时间续期一次，锁丢失或被取消时退出
    fn spawn_renewal(
        backend: Arc<dyn LockBackend>,
        name: String,
        token: String,
        ttl_ms: u64,
    ) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let period = Duration::from_millis((ttl_ms / 3).max(1));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        match backend.extend(&name, &token, ttl_ms).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("Lock {} lost while held, stop renewing", name);
                                break;
                            }
                            Err(e) => warn!("Failed to renew lock {}: {}", name, e),
                        }
                    }
                }
            }
        });

        (cancel, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn stop_renewal(&mut self) {
        if let Some((cancel, handle)) = self.renewal.take() {
            cancel.cancel();
            handle.abort();
        }
    }

    /// 释放锁
    ///
    /// 返回锁是否仍由本持有者持有并被删除
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.stop_renewal();
        let released = self.backend.release(&self.name, &self.token).await?;
        debug!("Released lock {}: {}", self.name, released);
        Ok(released)
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.stop_renewal();

        let backend = self.backend.clone();
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("ScopedLock {} dropped without release, releasing in background", name);
                handle.spawn(async move {
                    if let Err(e) = backend.release(&name, &token).await {
                        warn!("Background release of lock {} failed: {}", name, e);
                    }
                });
            }
            Err(_) => warn!(
                "ScopedLock {} dropped outside a tokio runtime, it will expire on its own",
                name
            ),
        }
    }
}
