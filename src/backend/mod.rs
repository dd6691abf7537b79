//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了列表存储后端，包括基于内存和基于Redis的实现。

pub mod memory;
pub mod redis;
pub mod redis_provider;

use crate::error::Result;
use async_trait::async_trait;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// 有序列表存储
///
/// 每个集合对应一个只追加的有序列表。索引语义与 Redis LRANGE 一致，
/// 负索引从尾部计数，区间两端都包含。
#[async_trait]
pub trait ListStore: Send + Sync {
    /// 追加一条记录到列表末尾
    async fn push(&self, key: &str, record: String) -> Result<()>;

    /// 以一个批次（管道）追加多条记录，保持给定顺序
    async fn push_batch(&self, key: &str, records: Vec<String>) -> Result<()>;

    /// 读取闭区间 `[start, end]` 的记录，越界时返回空
    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>>;

    /// 删除第一条与 `record` 相等的记录，返回是否删除
    async fn remove_one(&self, key: &str, record: &str) -> Result<bool>;

    /// 删除整个列表
    async fn clear(&self, key: &str) -> Result<()>;

    /// 列表长度
    async fn len(&self, key: &str) -> Result<usize>;

    /// 检查后端是否可达
    async fn ping(&self) -> Result<()>;
}
