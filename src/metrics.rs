//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了集合缓存的指标收集功能。

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集集合缓存的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 操作计数
    /// key: "collection:op:result"
    pub requests_total: Arc<DashMap<String, u64>>,
    /// 操作耗时（累积秒数和次数）
    /// key: "collection:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<DashMap<String, (f64, u64)>>,
    /// 最近一次重建写入的记录数
    pub cached_records: Arc<DashMap<String, usize>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录操作结果
    ///
    /// # 参数
    ///
    /// * `collection` - 集合（`db.collection`）
    /// * `op` - 操作类型（cache/insert/delete/get）
    /// * `result` - 操作结果（ok/error/hit/miss）
    pub fn record_request(&self, collection: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", collection, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", collection, op, result);
        *self.requests_total.entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, collection: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", collection, op);
        let mut entry = self.operation_duration.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置最近一次重建的记录数
    pub fn set_cached_records(&self, collection: &str, count: usize) {
        self.cached_records.insert(collection.to_string(), count);
    }

    /// 读取某个操作计数
    pub fn request_count(&self, collection: &str, op: &str, result: &str) -> u64 {
        self.requests_total
            .get(&format!("{}:{}:{}", collection, op, result))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// 将所有指标格式化为文本，用于监控系统采集
    pub fn render(&self) -> String {
        let mut output = String::new();
        for entry in self.requests_total.iter() {
            let parts: Vec<&str> = entry.key().rsplitn(3, ':').collect();
            if let [result, op, collection] = parts.as_slice() {
                output.push_str(&format!(
                    "collcache_requests_total{{collection=\"{}\", operation=\"{}\", result=\"{}\"}} {}\n",
                    collection,
                    op,
                    result,
                    entry.value()
                ));
            }
        }
        for entry in self.operation_duration.iter() {
            if let Some((collection, op)) = entry.key().rsplit_once(':') {
                let (total, count) = *entry.value();
                output.push_str(&format!(
                    "collcache_operation_duration_seconds_sum{{collection=\"{}\", operation=\"{}\"}} {}\n",
                    collection, op, total
                ));
                output.push_str(&format!(
                    "collcache_operation_duration_seconds_count{{collection=\"{}\", operation=\"{}\"}} {}\n",
                    collection, op, count
                ));
            }
        }
        for entry in self.cached_records.iter() {
            output.push_str(&format!(
                "collcache_cached_records{{collection=\"{}\"}} {}\n",
                entry.key(),
                entry.value()
            ));
        }
        output
    }
}
