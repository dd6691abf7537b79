//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了集合缓存系统的错误类型和处理机制。

use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 存储层和锁服务的错误都直接返回给调用方，只有后台刷新任务会吞掉错误并记录日志
#[derive(Error, Debug)]
pub enum CacheError {
    /// 锁服务不可达
    #[error("Lock backend unavailable: {0}")]
    LockUnavailable(String),

    /// 等待锁超时
    #[error("Timed out after {waited_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, waited_ms: u64 },

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 列表存储不可达
    #[error("List store unavailable: {0}")]
    StoreUnavailable(String),

    /// 外部集合数据源在扫描过程中失败
    #[error("Source enumeration failed: {0}")]
    SourceEnumeration(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// 是否为锁相关错误
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            CacheError::LockUnavailable(_) | CacheError::LockTimeout { .. }
        )
    }
}

/// 缓存操作结果类型别名
///
/// 简化错误处理，所有缓存操作都返回此类型
pub type Result<T> = std::result::Result<T, CacheError>;
