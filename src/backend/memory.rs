//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内的列表存储和锁后端，适用于单进程部署和测试。

use super::ListStore;
use crate::error::Result;
use crate::lock::LockBackend;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn new(token: &str, ttl_ms: u64) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now() + Duration::from_millis(ttl_ms),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 内存后端实现
///
/// 列表和锁都保存在 `DashMap` 中
#[derive(Debug, Default)]
pub struct MemoryBackend {
    lists: DashMap<String, Vec<String>>,
    locks: DashMap<String, LockEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前锁的持有者令牌（过期的锁视为不存在）
    pub fn lock_holder(&self, name: &str) -> Option<String> {
        self.locks
            .get(name)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.token.clone())
    }
}

/// 把 LRANGE 风格的索引换算为切片区间
fn normalize_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }

    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };

    if start > end || start >= len {
        return None;
    }

    Some((start as usize, end as usize))
}

#[async_trait]
impl ListStore for MemoryBackend {
    #[instrument(skip(self, record), level = "trace")]
    async fn push(&self, key: &str, record: String) -> Result<()> {
        self.lists.entry(key.to_string()).or_default().push(record);
        Ok(())
    }

    #[instrument(skip(self, records), level = "trace", fields(count = records.len()))]
    async fn push_batch(&self, key: &str, records: Vec<String>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.lists
            .entry(key.to_string())
            .or_default()
            .extend(records);
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.len(), start, end) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn remove_one(&self, key: &str, record: &str) -> Result<bool> {
        let removed = match self.lists.get_mut(key) {
            Some(mut list) => match list.iter().position(|r| r == record) {
                Some(idx) => {
                    list.remove(idx);
                    true
                }
                None => false,
            },
            None => false,
        };
        // Redis 会删除变空的列表
        self.lists.remove_if(key, |_, list| list.is_empty());
        Ok(removed)
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.lists.remove(key);
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        Ok(self.lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LockBackend for MemoryBackend {
    async fn try_acquire(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let acquired = match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(LockEntry::new(token, ttl_ms));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry::new(token, ttl_ms));
                true
            }
        };
        debug!("memory lock {}: acquired={}", name, acquired);
        Ok(acquired)
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        Ok(self
            .locks
            .remove_if(name, |_, entry| entry.token == token)
            .is_some())
    }

    async fn extend(&self, name: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        match self.locks.get_mut(name) {
            Some(mut entry) if entry.token == token && !entry.is_expired() => {
                entry.expires_at = Instant::now() + Duration::from_millis(ttl_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
