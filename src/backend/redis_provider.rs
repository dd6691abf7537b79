//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis提供者接口和默认实现。

use crate::{
    config::{RedisConfig, SentinelConfig},
    error::{CacheError, Result},
    utils::redaction::redact_connection_string,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::{timeout, Duration};

#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &RedisConfig)
        -> Result<(Client, ConnectionManager)>;
    async fn get_sentinel_client(&self, config: &RedisConfig)
        -> Result<(Client, ConnectionManager)>;
}

/// 单机模式的连接地址，启用 TLS 时切换到 `rediss://`
fn standalone_url(config: &RedisConfig) -> String {
    let url = config.connection_string.expose_secret();
    match url.strip_prefix("redis://") {
        Some(rest) if config.enable_tls => format!("rediss://{}", rest),
        _ => url.to_string(),
    }
}

/// 哨兵模式的连接地址
///
/// 格式为 `redis+sentinel://[:password@]host:port[,host:port]/master_name`
fn sentinel_url(sentinel: &SentinelConfig, password: Option<&SecretString>) -> Result<String> {
    let hosts = sentinel
        .nodes
        .iter()
        .map(|node| {
            ["redis+sentinel://", "redis://"]
                .iter()
                .fold(node.as_str(), |n, scheme| n.strip_prefix(*scheme).unwrap_or(n))
        })
        .collect::<Vec<_>>();

    if hosts.is_empty() {
        return Err(CacheError::Configuration(
            "redis.sentinel.nodes is empty".to_string(),
        ));
    }

    let auth = password
        .map(|p| format!(":{}@", p.expose_secret()))
        .unwrap_or_default();
    Ok(format!(
        "redis+sentinel://{}{}/{}",
        auth,
        hosts.join(","),
        sentinel.master_name
    ))
}

/// 打开客户端并在连接超时内建立连接管理器
async fn connect(url: &str, connection_timeout_ms: u64) -> Result<(Client, ConnectionManager)> {
    let target = redact_connection_string(url);
    let client = Client::open(url).map_err(|e| {
        CacheError::Configuration(format!("invalid Redis URL {}: {}", target, e))
    })?;

    let manager = timeout(
        Duration::from_millis(connection_timeout_ms),
        client.get_connection_manager(),
    )
    .await
    .map_err(|_| {
        CacheError::StoreUnavailable(format!(
            "connecting to {} timed out after {}ms",
            target, connection_timeout_ms
        ))
    })?
    .map_err(|e| CacheError::StoreUnavailable(format!("connecting to {}: {}", target, e)))?;

    Ok((client, manager))
}

pub struct DefaultRedisProvider;

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(
        &self,
        config: &RedisConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let url = standalone_url(config);
        tracing::info!("Connecting to Redis at {}", redact_connection_string(&url));
        connect(&url, config.connection_timeout_ms).await
    }

    async fn get_sentinel_client(
        &self,
        config: &RedisConfig,
    ) -> Result<(Client, ConnectionManager)> {
        let sentinel = config.sentinel.as_ref().ok_or_else(|| {
            CacheError::Configuration("redis.sentinel is required in sentinel mode".to_string())
        })?;
        let url = sentinel_url(sentinel, config.password.as_ref())?;
        tracing::info!(
            "Connecting to Redis master '{}' through {} sentinel(s)",
            sentinel.master_name,
            sentinel.nodes.len()
        );
        connect(&url, config.connection_timeout_ms).await
    }
}
