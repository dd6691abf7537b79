//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存核心依赖的两个外部协作者：
//! 可被缓存的模型类型（含序列化钩子和文档映射器）以及集合数据源。

use crate::error::{CacheError, Result};
use crate::keyspace::CollectionId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// 可缓存的集合模型
///
/// 每个模型类型绑定到一个 (数据库, 集合)。`as_json` 是序列化适配器使用的钩子，
/// `map_document` 是把原始文档还原为类型化对象的映射器。两者必须互为逆运算。
pub trait Mongoclass: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 所属数据库名称
    const DATABASE_NAME: &'static str;
    /// 所属集合名称
    const COLLECTION_NAME: &'static str;

    /// 转换为 JSON 安全的表示
    fn as_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// 从原始文档构造对象
    ///
    /// # 参数
    ///
    /// * `document` - 原始文档
    /// * `collection` - 集合名称
    /// * `database` - 数据库名称
    fn map_document(document: Value, collection: &str, database: &str) -> Result<Self> {
        serde_json::from_value(document).map_err(|e| {
            CacheError::Serialization(format!(
                "cannot map document from {}.{}: {}",
                database, collection, e
            ))
        })
    }
}

/// 集合数据源
///
/// 枚举某个集合当前的全部文档，需反映调用时刻的权威状态，不要求事务快照。
/// 流中的 `Err` 表示扫描中途失败。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CollectionSource: Send + Sync {
    async fn enumerate_all(
        &self,
        collection: &CollectionId,
    ) -> Result<BoxStream<'static, Result<Value>>>;
}

#[async_trait]
impl<S: CollectionSource + ?Sized> CollectionSource for Arc<S> {
    async fn enumerate_all(
        &self,
        collection: &CollectionId,
    ) -> Result<BoxStream<'static, Result<Value>>> {
        (**self).enumerate_all(collection).await
    }
}
