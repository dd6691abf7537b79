//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! Redis后端集成测试，Redis不可用时跳过

use collcache::backend::{ListStore, RedisBackend};
use collcache::config::{Config, RedisMode};
use collcache::error::CacheError;
use collcache::lock::{LockBackend, LockManager};
use collcache::manager::CacheManager;
use collcache::model::Mongoclass;
use common::{is_redis_available, redis_config, setup_logging, user_docs, User, VecSource};
use futures::TryStreamExt;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ticket {
    id: u32,
    title: String,
}

impl Mongoclass for Ticket {
    const DATABASE_NAME: &'static str = "collcache_it";
    const COLLECTION_NAME: &'static str = "tickets";
}

#[tokio::test]
#[serial]
async fn test_redis_users_scenario() {
    if !is_redis_available().await {
        println!("Skipping test_redis_users_scenario: Redis not available");
        return;
    }
    setup_logging();

    let manager = CacheManager::connect(redis_config()).await.unwrap();
    manager.invalidate::<User>().await.unwrap();

    let source = VecSource::new(user_docs(1..=3));
    assert_eq!(manager.cache::<User, _>(&source).await.unwrap(), 3);

    let users: Vec<User> = manager.get_cached::<User>(2).try_collect().await.unwrap();
    assert_eq!(users, vec![User::new(1), User::new(2), User::new(3)]);

    manager.insert(&User::new(4)).await.unwrap();
    assert_eq!(
        manager.get::<User, _>(|u| u.id == 4).await.unwrap(),
        Some(User::new(4))
    );
    assert!(manager.delete::<User, _>(|u| u.id == 2).await.unwrap());
    assert!(!manager.delete::<User, _>(|u| u.id == 2).await.unwrap());

    let ids: Vec<u32> = manager
        .get_cached::<User>(2)
        .try_collect::<Vec<User>>()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(ids, vec![1, 3, 4]);

    manager.invalidate::<User>().await.unwrap();
    assert_eq!(manager.len::<User>().await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_redis_list_store_semantics() {
    if !is_redis_available().await {
        println!("Skipping test_redis_list_store_semantics: Redis not available");
        return;
    }

    let backend = RedisBackend::new(&redis_config().redis).await.unwrap();
    let key = "collcache_it:list_semantics";
    backend.clear(key).await.unwrap();
    backend.ping().await.unwrap();

    backend.push(key, "a".to_string()).await.unwrap();
    backend
        .push_batch(key, vec!["b".to_string(), "a".to_string(), "c".to_string()])
        .await
        .unwrap();
    assert_eq!(backend.len(key).await.unwrap(), 4);
    assert_eq!(backend.range(key, 0, 1).await.unwrap(), vec!["a", "b"]);
    assert_eq!(backend.range(key, 2, 10).await.unwrap(), vec!["a", "c"]);
    assert!(backend.range(key, 4, 7).await.unwrap().is_empty());

    // 只删除第一条相等的记录
    assert!(backend.remove_one(key, "a").await.unwrap());
    assert_eq!(backend.range(key, 0, -1).await.unwrap(), vec!["b", "a", "c"]);
    assert!(!backend.remove_one(key, "zzz").await.unwrap());

    backend.push_batch(key, Vec::new()).await.unwrap();
    backend.clear(key).await.unwrap();
    assert_eq!(backend.len(key).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_redis_lock_semantics() {
    if !is_redis_available().await {
        println!("Skipping test_redis_lock_semantics: Redis not available");
        return;
    }

    let backend = RedisBackend::new(&redis_config().redis).await.unwrap();
    let name = "lock:collcache_it:lock_semantics";
    backend.release(name, "owner-a").await.unwrap();
    backend.release(name, "owner-b").await.unwrap();

    assert!(backend.try_acquire(name, "owner-a", 5_000).await.unwrap());
    assert!(!backend.try_acquire(name, "owner-b", 5_000).await.unwrap());

    // 非持有者不能释放或续期
    assert!(!backend.release(name, "owner-b").await.unwrap());
    assert!(!backend.extend(name, "owner-b", 5_000).await.unwrap());
    assert!(backend.extend(name, "owner-a", 5_000).await.unwrap());

    assert!(backend.release(name, "owner-a").await.unwrap());
    assert!(backend.try_acquire(name, "owner-b", 100).await.unwrap());

    // 过期后其他持有者可以获取
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(backend.try_acquire(name, "owner-a", 5_000).await.unwrap());
    assert!(backend.release(name, "owner-a").await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_redis_lock_blocks_second_manager() {
    if !is_redis_available().await {
        println!("Skipping test_redis_lock_blocks_second_manager: Redis not available");
        return;
    }

    let mut config = redis_config();
    config.lock.wait_timeout_ms = Some(150);
    let manager = CacheManager::connect(config.clone()).await.unwrap();
    manager.invalidate::<Ticket>().await.unwrap();

    let backend = Arc::new(RedisBackend::new(&config.redis).await.unwrap());
    let other = LockManager::new(backend, config.lock.clone());
    let guard = other.acquire("lock:collcache_it:tickets").await.unwrap();

    let ticket = Ticket {
        id: 1,
        title: "broken build".to_string(),
    };
    let err = manager.insert(&ticket).await.unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }));

    assert!(guard.release().await.unwrap());
    manager.insert(&ticket).await.unwrap();
    assert_eq!(manager.len::<Ticket>().await.unwrap(), 1);
    manager.invalidate::<Ticket>().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_redis_is_store_unavailable() {
    let mut config = Config::default();
    config.redis.connection_string = SecretString::new("redis://127.0.0.1:1".to_string().into());
    config.redis.connection_timeout_ms = 500;

    let err = CacheManager::connect(config).await.unwrap_err();
    assert!(matches!(err, CacheError::StoreUnavailable(_)), "{:?}", err);
}

#[tokio::test]
async fn test_sentinel_mode_requires_sentinel_config() {
    let mut config = Config::default();
    config.redis.mode = RedisMode::Sentinel;

    let err = CacheManager::connect(config).await.unwrap_err();
    assert!(matches!(err, CacheError::Configuration(_)));
}
