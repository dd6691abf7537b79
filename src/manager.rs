//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了集合缓存管理器：整表重建、增量插入/删除、按谓词查找以及惰性分页扫描。
//!
//! 重建、插入和删除都在集合锁内执行；惰性扫描不加锁，可能观察到重建或修改的中间状态。

use crate::backend::{ListStore, MemoryBackend, RedisBackend};
use crate::config::{Config, MAX_BATCH_SIZE};
use crate::error::{CacheError, Result};
use crate::keyspace::CollectionId;
use crate::lock::{LockBackend, LockManager};
use crate::metrics::Metrics;
use crate::model::{CollectionSource, Mongoclass};
use crate::serialization::{decode_record, encode_record, JsonSerializer};
use crate::sync::refresher::{start_periodic_after, RefreshHandle};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 预分配缓冲区的上限，批次更大时按需增长
const PREALLOC_LIMIT: usize = 1024;

/// 分页窗口生成器
///
/// 生成连续且互不重叠的闭区间 `[start, start + batch_size - 1]`
#[derive(Debug, Clone)]
pub struct BatchWindows {
    next_start: Option<i64>,
    batch_size: i64,
}

impl BatchWindows {
    /// `batch_size` 必须在 `1..=MAX_BATCH_SIZE` 之内，否则返回 `Configuration`
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(CacheError::Configuration(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, batch_size
            )));
        }
        let batch_size = i64::try_from(batch_size).map_err(|_| {
            CacheError::Configuration(format!("batch_size {} does not fit in i64", batch_size))
        })?;
        Ok(Self {
            next_start: Some(0),
            batch_size,
        })
    }
}

impl Iterator for BatchWindows {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let end = start.checked_add(self.batch_size - 1)?;
        self.next_start = end.checked_add(1);
        Some((start, end))
    }
}

struct ScanState<'a> {
    manager: &'a CacheManager,
    collection: CollectionId,
    key: String,
    windows: BatchWindows,
    buffer: VecDeque<String>,
    finished: bool,
}

/// 集合缓存管理器
///
/// 可以在多个任务之间共享（通常放在 `Arc` 中）
pub struct CacheManager {
    store: Arc<dyn ListStore>,
    locks: LockManager,
    serializer: JsonSerializer,
    config: Config,
    metrics: Metrics,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("key_prefix", &self.config.cache.key_prefix)
            .field("locks", &self.locks)
            .finish()
    }
}

impl CacheManager {
    /// 使用指定的列表存储和锁后端创建管理器
    ///
    /// # 参数
    ///
    /// * `store` - 列表存储
    /// * `lock_backend` - 锁后端
    /// * `config` - 配置，创建前会先验证
    pub fn new(
        store: Arc<dyn ListStore>,
        lock_backend: Arc<dyn LockBackend>,
        config: Config,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::Configuration)?;
        Ok(Self {
            store,
            locks: LockManager::new(lock_backend, config.lock.clone()),
            serializer: JsonSerializer::new(),
            config,
            metrics: Metrics::new(),
        })
    }

    /// 连接Redis，列表和锁使用同一个后端
    #[instrument(skip(config), level = "info")]
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate().map_err(CacheError::Configuration)?;
        let backend = Arc::new(RedisBackend::new(&config.redis).await?);
        info!("CacheManager connected to Redis");
        Self::new(backend.clone(), backend, config)
    }

    /// 使用进程内后端创建管理器
    pub fn in_memory(config: Config) -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new());
        Self::new(backend.clone(), backend, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn ListStore> {
        &self.store
    }

    /// 集合对应的列表键
    pub fn list_key(&self, collection: &CollectionId) -> String {
        collection.list_key_with_prefix(&self.config.cache.key_prefix)
    }

    fn record_outcome<V>(&self, collection: &CollectionId, op: &str, result: &Result<V>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.metrics
            .record_request(&collection.to_string(), op, outcome);
    }

    /// 重建集合缓存
    ///
    /// 在集合锁内清空列表，然后枚举数据源中的全部文档，映射、序列化并分批写入。
    /// 返回写入的记录数。数据源中途失败时列表处于"已清空但不完整"状态，
    /// 调用方应视该集合的缓存为未定义并重试。
    #[instrument(skip(self, source), level = "info", fields(database = T::DATABASE_NAME, collection = T::COLLECTION_NAME))]
    pub async fn cache<T, S>(&self, source: &S) -> Result<usize>
    where
        T: Mongoclass,
        S: CollectionSource + ?Sized,
    {
        let collection = CollectionId::of::<T>();
        let key = self.list_key(&collection);
        let started = Instant::now();
        let mut written = 0usize;

        let result = {
            let collection = &collection;
            let key = key.as_str();
            let progress = &mut written;
            self.locks
                .with_lock(&collection.lock_name(), move || {
                    self.rebuild_locked::<T, S>(collection, key, source, progress)
                })
                .await
        };

        let name = collection.to_string();
        self.record_outcome(&collection, "cache", &result);
        self.metrics
            .record_duration(&name, "cache", started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.set_cached_records(&name, written);
                info!(
                    "Cached {} records for {} in {:?}",
                    written,
                    name,
                    started.elapsed()
                );
                Ok(written)
            }
            Err(e) => {
                warn!(
                    "Rebuild of {} failed after {} records, cache is undefined until the next successful rebuild: {}",
                    name, written, e
                );
                Err(e)
            }
        }
    }

    async fn rebuild_locked<T, S>(
        &self,
        collection: &CollectionId,
        key: &str,
        source: &S,
        written: &mut usize,
    ) -> Result<()>
    where
        T: Mongoclass,
        S: CollectionSource + ?Sized,
    {
        self.store.clear(key).await?;

        let mut documents = source.enumerate_all(collection).await?;
        let batch_size = self.config.cache.write_batch_size;
        let capacity = batch_size.min(PREALLOC_LIMIT);
        let mut buffer = Vec::with_capacity(capacity);

        while let Some(document) = documents.next().await {
            let object = T::map_document(document?, &collection.collection, &collection.database)?;
            buffer.push(encode_record(&self.serializer, &object)?);

            if buffer.len() >= batch_size {
                let count = buffer.len();
                self.store
                    .push_batch(key, std::mem::replace(&mut buffer, Vec::with_capacity(capacity)))
                    .await?;
                *written += count;
                debug!("Flushed {} records to {}", count, key);
            }
        }

        if !buffer.is_empty() {
            let count = buffer.len();
            self.store.push_batch(key, buffer).await?;
            *written += count;
        }

        Ok(())
    }

    /// 重建缓存，并在 `every` 非零时启动后台刷新
    ///
    /// 第一次后台刷新发生在 `every` 之后。返回的句柄被丢弃时刷新任务停止，
    /// 调用 [`RefreshHandle::detach`] 可让它随进程一直运行。
    #[must_use = "dropping the returned RefreshHandle stops the refresh task; call detach() to keep it running"]
    pub async fn cache_every<T, S>(
        self: &Arc<Self>,
        source: Arc<S>,
        every: Duration,
    ) -> Result<Option<RefreshHandle>>
    where
        T: Mongoclass,
        S: CollectionSource + ?Sized + 'static,
    {
        self.cache::<T, S>(source.as_ref()).await?;
        if every.is_zero() {
            return Ok(None);
        }
        start_periodic_after::<T, S>(self.clone(), source, every, every).map(Some)
    }

    /// 向缓存追加一个对象
    ///
    /// 序列化失败时返回 `Serialization`，不会写入任何内容
    #[instrument(skip(self, object), level = "debug", fields(database = T::DATABASE_NAME, collection = T::COLLECTION_NAME))]
    pub async fn insert<T: Mongoclass>(&self, object: &T) -> Result<()> {
        let collection = CollectionId::of::<T>();
        let record = encode_record(&self.serializer, object);
        let result = match record {
            Ok(record) => {
                let key = self.list_key(&collection);
                self.locks
                    .with_lock(&collection.lock_name(), || self.store.push(&key, record))
                    .await
            }
            Err(e) => Err(e),
        };
        self.record_outcome(&collection, "insert", &result);
        result
    }

    /// 删除第一个满足谓词的记录
    ///
    /// 查找和删除在同一个临界区内完成，删除的是扫描时读到的那条原始记录。
    /// 没有匹配时返回 false。
    #[instrument(skip(self, predicate), level = "debug", fields(database = T::DATABASE_NAME, collection = T::COLLECTION_NAME))]
    pub async fn delete<T, F>(&self, predicate: F) -> Result<bool>
    where
        T: Mongoclass,
        F: Fn(&T) -> bool + Send + Sync,
    {
        let collection = CollectionId::of::<T>();
        let key = self.list_key(&collection);
        let result = self
            .locks
            .with_lock(&collection.lock_name(), || {
                self.find_and_remove::<T, F>(&collection, &key, &predicate)
            })
            .await;

        self.record_outcome(&collection, "delete", &result);
        if let Ok(false) = result {
            self.metrics
                .record_request(&collection.to_string(), "delete", "miss");
        }
        result
    }

    async fn find_and_remove<T, F>(
        &self,
        collection: &CollectionId,
        key: &str,
        predicate: &F,
    ) -> Result<bool>
    where
        T: Mongoclass,
        F: Fn(&T) -> bool + Send + Sync,
    {
        for (start, end) in BatchWindows::new(self.config.cache.read_batch_size)? {
            let page = self.store.range(key, start, end).await?;
            if page.is_empty() {
                return Ok(false);
            }
            for raw in page {
                let object: T = decode_record(&self.serializer, &raw, collection)?;
                if predicate(&object) {
                    let removed = self.store.remove_one(key, &raw).await?;
                    debug!("Removed matching record from {}: {}", key, removed);
                    return Ok(removed);
                }
            }
        }
        Ok(false)
    }

    /// 按值删除一个对象的一条记录
    ///
    /// 对象重新序列化后与列表中的记录逐字节比较
    pub async fn delete_object<T: Mongoclass>(&self, object: &T) -> Result<bool> {
        let collection = CollectionId::of::<T>();
        let record = encode_record(&self.serializer, object)?;
        let key = self.list_key(&collection);
        let result = self
            .locks
            .with_lock(&collection.lock_name(), || self.store.remove_one(&key, &record))
            .await;
        self.record_outcome(&collection, "delete", &result);
        result
    }

    /// 返回第一个满足谓词的对象
    ///
    /// 按列表顺序（插入顺序）扫描，不加锁
    #[instrument(skip(self, predicate), level = "debug", fields(database = T::DATABASE_NAME, collection = T::COLLECTION_NAME))]
    pub async fn get<T, F>(&self, predicate: F) -> Result<Option<T>>
    where
        T: Mongoclass,
        F: Fn(&T) -> bool,
    {
        let collection = CollectionId::of::<T>();
        let mut items = self.get_cached::<T>(self.config.cache.read_batch_size);
        while let Some(item) = items.next().await {
            let item = item?;
            if predicate(&item) {
                self.metrics
                    .record_request(&collection.to_string(), "get", "hit");
                return Ok(Some(item));
            }
        }
        self.metrics
            .record_request(&collection.to_string(), "get", "miss");
        Ok(None)
    }

    /// 惰性扫描集合缓存中的全部对象
    ///
    /// 每次读取 `batch_size` 条记录，读到空批次时结束。每次调用都从头开始。
    /// `batch_size` 为 0 或超过 [`MAX_BATCH_SIZE`] 时流只产生一个 `Configuration` 错误。
    pub fn get_cached<T: Mongoclass>(&self, batch_size: usize) -> BoxStream<'_, Result<T>> {
        let windows = match BatchWindows::new(batch_size) {
            Ok(windows) => windows,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let collection = CollectionId::of::<T>();
        let state = ScanState {
            manager: self,
            key: self.list_key(&collection),
            collection,
            windows,
            buffer: VecDeque::with_capacity(batch_size.min(PREALLOC_LIMIT)),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(raw) = state.buffer.pop_front() {
                    let item =
                        decode_record::<_, T>(&state.manager.serializer, &raw, &state.collection);
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                let (start, end) = state.windows.next()?;
                match state.manager.store.range(&state.key, start, end).await {
                    Ok(page) if page.is_empty() => return None,
                    Ok(page) => state.buffer.extend(page),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }

    /// 集合缓存中的记录数
    pub async fn len<T: Mongoclass>(&self) -> Result<usize> {
        self.store.len(&self.list_key(&CollectionId::of::<T>())).await
    }

    /// 在集合锁内清空集合缓存
    #[instrument(skip(self), level = "info", fields(database = T::DATABASE_NAME, collection = T::COLLECTION_NAME))]
    pub async fn invalidate<T: Mongoclass>(&self) -> Result<()> {
        let collection = CollectionId::of::<T>();
        let key = self.list_key(&collection);
        let result = self
            .locks
            .with_lock(&collection.lock_name(), || self.store.clear(&key))
            .await;
        self.record_outcome(&collection, "invalidate", &result);
        result
    }
}
