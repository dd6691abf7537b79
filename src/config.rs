//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了集合缓存的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use crate::keyspace::DEFAULT_LIST_PREFIX;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 单个批次允许的最大记录数
pub const MAX_BATCH_SIZE: usize = 100_000;

/// 顶层配置
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub config_version: Option<u32>,
    pub redis: RedisConfig,
    pub lock: LockConfig,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
}

/// Redis模式
#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
}

/// Redis连接配置
///
/// 列表存储和分布式锁共用同一个 Redis
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// Redis 密码（可选，使用 SecretString 保护）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://127.0.0.1:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            password: None,
            enable_tls: false,
            sentinel: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 分布式锁配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LockConfig {
    /// 锁的过期时间（毫秒），持有者崩溃后锁最多保留这么久
    pub ttl_ms: u64,
    /// 获取锁失败后的重试间隔（毫秒）
    pub retry_interval_ms: u64,
    /// 最长等待时间（毫秒），None 表示一直等待
    pub wait_timeout_ms: Option<u64>,
    /// 持有期间是否自动续期
    pub auto_extend: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            retry_interval_ms: 50,
            wait_timeout_ms: None,
            auto_extend: true,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

/// 缓存读写配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 列表键前缀
    pub key_prefix: String,
    /// 惰性扫描每批读取的记录数
    pub read_batch_size: usize,
    /// 重建时每个管道批次写入的记录数
    pub write_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_LIST_PREFIX.to_string(),
            read_batch_size: 500,
            write_batch_size: 1000,
        }
    }
}

/// 后台刷新配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RefreshConfig {
    /// 刷新失败后首次重试的等待时间（毫秒），之后指数增长，最多等待一个刷新间隔
    pub retry_backoff_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 1000,
        }
    }
}

impl Config {
    /// 从TOML文本解析配置并验证
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CacheError::Configuration(e.to_string()))?;
        config.validate().map_err(CacheError::Configuration)?;
        Ok(config)
    }

    /// 从TOML文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.redis.command_timeout_ms == 0 {
            return Err("redis.command_timeout_ms cannot be zero".to_string());
        }

        if self.redis.connection_timeout_ms == 0 {
            return Err("redis.connection_timeout_ms cannot be zero".to_string());
        }

        if self.redis.mode == RedisMode::Sentinel && self.redis.sentinel.is_none() {
            return Err("redis.sentinel is required in sentinel mode".to_string());
        }

        if self.lock.ttl_ms == 0 {
            return Err("lock.ttl_ms cannot be zero".to_string());
        }

        if self.lock.retry_interval_ms == 0 {
            return Err("lock.retry_interval_ms cannot be zero".to_string());
        }

        if self.lock.ttl_ms <= self.lock.retry_interval_ms {
            return Err(format!(
                "lock.ttl_ms ({}) must be greater than lock.retry_interval_ms ({})",
                self.lock.ttl_ms, self.lock.retry_interval_ms
            ));
        }

        if self.cache.key_prefix.is_empty() {
            return Err("cache.key_prefix cannot be empty".to_string());
        }

        if self.cache.key_prefix.contains(':') {
            return Err("cache.key_prefix cannot contain ':'".to_string());
        }

        if self.cache.read_batch_size == 0 {
            return Err("cache.read_batch_size cannot be zero".to_string());
        }

        if self.cache.write_batch_size == 0 {
            return Err("cache.write_batch_size cannot be zero".to_string());
        }

        if self.cache.read_batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "cache.read_batch_size ({}) cannot exceed {}",
                self.cache.read_batch_size, MAX_BATCH_SIZE
            ));
        }

        if self.cache.write_batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "cache.write_batch_size ({}) cannot exceed {}",
                self.cache.write_batch_size, MAX_BATCH_SIZE
            ));
        }

        if self.refresh.retry_backoff_ms == 0 {
            return Err("refresh.retry_backoff_ms cannot be zero".to_string());
        }

        Ok(())
    }
}
