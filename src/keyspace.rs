//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块负责根据 (数据库名, 集合名) 推导缓存列表键和锁名称。

use crate::model::Mongoclass;
use std::fmt;

/// 缓存列表键的默认前缀
pub const DEFAULT_LIST_PREFIX: &str = "mongoclass";

/// 锁名称前缀，所有进程必须使用同一个前缀才能互斥
pub const LOCK_PREFIX: &str = "lock";

/// 返回集合缓存列表的键
pub fn list_key(database: &str, collection: &str) -> String {
    format!("{}:{}:{}", DEFAULT_LIST_PREFIX, database, collection)
}

/// 返回集合锁的名称
pub fn lock_name(database: &str, collection: &str) -> String {
    format!("{}:{}:{}", LOCK_PREFIX, database, collection)
}

/// 集合标识
///
/// 以 (数据库名, 集合名) 作为自然键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId {
    pub database: String,
    pub collection: String,
}

impl CollectionId {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// 从模型类型的常量构造集合标识
    pub fn of<T: Mongoclass>() -> Self {
        Self::new(T::DATABASE_NAME, T::COLLECTION_NAME)
    }

    /// 使用默认前缀的列表键
    pub fn list_key(&self) -> String {
        list_key(&self.database, &self.collection)
    }

    /// 使用自定义前缀的列表键
    pub fn list_key_with_prefix(&self, prefix: &str) -> String {
        format!("{}:{}:{}", prefix, self.database, self.collection)
    }

    pub fn lock_name(&self) -> String {
        lock_name(&self.database, &self.collection)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
