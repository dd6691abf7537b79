//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的列表存储和分布式锁后端。

use super::redis_provider::{DefaultRedisProvider, RedisProvider};
use super::ListStore;
use crate::config::{RedisConfig, RedisMode};
use crate::error::{CacheError, Result};
use crate::lock::LockBackend;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis后端实现
///
/// 列表操作映射到 RPUSH/LRANGE/LREM/DEL，锁基于 SET NX PX 和 Lua 脚本。
/// 每条命令都受 `command_timeout_ms` 约束。
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    command_timeout_ms: u64,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("command_timeout_ms", &self.command_timeout_ms)
            .finish()
    }
}

impl RedisBackend {
    /// 创建新的Redis后端实例
    ///
    /// # 参数
    ///
    /// * `config` - Redis配置
    ///
    /// # 返回值
    ///
    /// 返回新的RedisBackend实例或错误
    #[instrument(skip(config), level = "info", name = "init_redis_backend")]
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        Self::new_with_provider(config, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的Redis提供者创建后端实例
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &RedisConfig,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        debug!("Initializing RedisBackend with mode: {:?}", config.mode);
        let (_client, manager) = match config.mode {
            RedisMode::Standalone => provider.get_standalone_client(config).await?,
            RedisMode::Sentinel => provider.get_sentinel_client(config).await?,
        };
        Ok(Self::from_manager(manager, config.command_timeout_ms))
    }

    /// 从已有的连接管理器创建后端
    pub fn from_manager(manager: ConnectionManager, command_timeout_ms: u64) -> Self {
        Self {
            manager,
            command_timeout_ms,
        }
    }

    /// 获取命令超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        self.command_timeout_ms
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 带超时执行一条命令，错误以文本形式返回，由调用方决定错误类别
    async fn run<T, F>(&self, op: &str, fut: F) -> std::result::Result<T, String>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match timeout(Duration::from_millis(self.command_timeout_ms), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{} failed: {}", op, e)),
            Err(_) => Err(format!(
                "{} timed out after {}ms",
                op, self.command_timeout_ms
            )),
        }
    }
}

#[async_trait]
impl ListStore for RedisBackend {
    #[instrument(skip(self, record), level = "debug", fields(record_len = record.len()))]
    async fn push(&self, key: &str, record: String) -> Result<()> {
        let mut conn = self.connection();
        self.run(
            "RPUSH",
            redis::cmd("RPUSH")
                .arg(key)
                .arg(record)
                .query_async::<i64>(&mut conn),
        )
        .await
        .map_err(CacheError::StoreUnavailable)?;
        Ok(())
    }

    #[instrument(skip(self, records), level = "debug", fields(count = records.len()))]
    async fn push_batch(&self, key: &str, records: Vec<String>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        debug!("Pipeline push of {} records to {}", records.len(), key);
        let mut pipe = redis::pipe();
        for record in records {
            pipe.rpush(key, record).ignore();
        }
        let mut conn = self.connection();
        self.run("RPUSH pipeline", pipe.query_async::<()>(&mut conn))
            .await
            .map_err(CacheError::StoreUnavailable)
    }

    #[instrument(skip(self), level = "debug")]
    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>> {
        let mut conn = self.connection();
        self.run(
            "LRANGE",
            redis::cmd("LRANGE")
                .arg(key)
                .arg(start)
                .arg(end)
                .query_async::<Vec<String>>(&mut conn),
        )
        .await
        .map_err(CacheError::StoreUnavailable)
    }

    #[instrument(skip(self, record), level = "debug")]
    async fn remove_one(&self, key: &str, record: &str) -> Result<bool> {
        let mut conn = self.connection();
        let removed = self
            .run(
                "LREM",
                redis::cmd("LREM")
                    .arg(key)
                    .arg(1)
                    .arg(record)
                    .query_async::<i64>(&mut conn),
            )
            .await
            .map_err(CacheError::StoreUnavailable)?;
        Ok(removed > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear(&self, key: &str) -> Result<()> {
        let mut conn = self.connection();
        self.run(
            "DEL",
            redis::cmd("DEL").arg(key).query_async::<i64>(&mut conn),
        )
        .await
        .map_err(CacheError::StoreUnavailable)?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection();
        let len = self
            .run(
                "LLEN",
                redis::cmd("LLEN").arg(key).query_async::<i64>(&mut conn),
            )
            .await
            .map_err(CacheError::StoreUnavailable)?;
        Ok(len.max(0) as usize)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        self.run("PING", redis::cmd("PING").query_async::<String>(&mut conn))
            .await
            .map_err(CacheError::StoreUnavailable)?;
        Ok(())
    }
}

#[async_trait]
impl LockBackend for RedisBackend {
    /// 尝试获取分布式锁
    ///
    /// 使用 SET NX PX 实现
    #[instrument(skip(self, token), level = "debug")]
    async fn try_acquire(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.connection();
        let result = self
            .run(
                "SET NX",
                redis::cmd("SET")
                    .arg(name)
                    .arg(token)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<Option<String>>(&mut conn),
            )
            .await
            .map_err(CacheError::LockUnavailable)?;
        debug!("Lock acquisition result: name={}, success={}", name, result.is_some());
        Ok(result.is_some())
    }

    /// 释放分布式锁
    ///
    /// 使用 Lua 脚本保证只有持有者能删除
    #[instrument(skip(self, token), level = "debug")]
    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        let script = redis::Script::new(RELEASE_SCRIPT);
        let mut conn = self.connection();
        let result = self
            .run(
                "lock release",
                script.key(name).arg(token).invoke_async::<i32>(&mut conn),
            )
            .await
            .map_err(CacheError::LockUnavailable)?;
        Ok(result == 1)
    }

    #[instrument(skip(self, token), level = "trace")]
    async fn extend(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let script = redis::Script::new(EXTEND_SCRIPT);
        let mut conn = self.connection();
        let result = self
            .run(
                "lock extend",
                script
                    .key(name)
                    .arg(token)
                    .arg(ttl_ms)
                    .invoke_async::<i32>(&mut conn),
            )
            .await
            .map_err(CacheError::LockUnavailable)?;
        Ok(result == 1)
    }
}
