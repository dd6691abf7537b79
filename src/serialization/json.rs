//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了JSON序列化器的实现。

use super::Serializer;
use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// JSON序列化器
///
/// 对象键按字典序输出，相等的值总是得到字节完全相同的记录，
/// 删除操作依赖这一点按值匹配记录。
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// 创建新的JSON序列化器
    pub fn new() -> Self {
        Self
    }
}

/// 递归地按键排序对象
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl Serializer for JsonSerializer {
    /// 序列化值为JSON文本
    ///
    /// # 参数
    ///
    /// * `value` - 要序列化的值
    ///
    /// # 返回值
    ///
    /// 返回序列化后的文本或错误
    fn serialize<T: Serialize>(&self, value: &T) -> Result<String> {
        let json =
            serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        serde_json::to_string(&canonicalize(json))
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// 从JSON文本反序列化值
    ///
    /// # 参数
    ///
    /// * `data` - 要反序列化的文本
    ///
    /// # 返回值
    ///
    /// 返回反序列化后的值或错误
    fn deserialize<T: DeserializeOwned>(&self, data: &str) -> Result<T> {
        serde_json::from_str(data).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
