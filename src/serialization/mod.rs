//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存记录的序列化机制：把模型对象转换为 JSON 安全的文本记录并还原。

pub mod json;

use crate::error::Result;
use crate::keyspace::CollectionId;
use crate::model::Mongoclass;
use serde::{de::DeserializeOwned, Serialize};

pub use json::JsonSerializer;

/// 序列化器特征
///
/// 定义序列化和反序列化操作的接口
pub trait Serializer: Send + Sync {
    /// 序列化值为文本记录
    fn serialize<T: Serialize>(&self, value: &T) -> Result<String>;

    /// 从文本记录反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &str) -> Result<T>;
}

/// 把模型对象编码为缓存记录
///
/// 先经过模型的 `as_json` 钩子，再编码为文本
pub fn encode_record<S: Serializer, T: Mongoclass>(serializer: &S, object: &T) -> Result<String> {
    let json = object.as_json()?;
    serializer.serialize(&json)
}

/// 把缓存记录解码并交给模型的映射器还原
pub fn decode_record<S: Serializer, T: Mongoclass>(
    serializer: &S,
    record: &str,
    collection: &CollectionId,
) -> Result<T> {
    let document: serde_json::Value = serializer.deserialize(record)?;
    T::map_document(document, &collection.collection, &collection.database)
}
