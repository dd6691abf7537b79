//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 集合锁集成测试：多个管理器共享同一个后端

use collcache::backend::MemoryBackend;
use collcache::config::{Config, LockConfig};
use collcache::error::CacheError;
use collcache::keyspace::{lock_name, CollectionId};
use collcache::lock::LockManager;
use collcache::manager::CacheManager;
use common::{setup_logging, user_docs, User, VecSource};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[path = "../common/mod.rs"]
mod common;

fn shared_config(wait_timeout_ms: Option<u64>) -> Config {
    let mut config = Config::default();
    config.lock.retry_interval_ms = 10;
    config.lock.wait_timeout_ms = wait_timeout_ms;
    config
}

/// 两个"进程"共享同一个后端
fn two_managers(backend: &Arc<MemoryBackend>, config: Config) -> (CacheManager, CacheManager) {
    let a = CacheManager::new(backend.clone(), backend.clone(), config.clone()).unwrap();
    let b = CacheManager::new(backend.clone(), backend.clone(), config).unwrap();
    (a, b)
}

#[tokio::test]
async fn test_held_lock_blocks_other_writers_until_timeout() {
    setup_logging();
    let backend = Arc::new(MemoryBackend::new());
    let (manager, _) = two_managers(&backend, shared_config(Some(100)));

    let external = LockManager::new(backend.clone(), shared_config(None).lock);
    let guard = external
        .acquire(&CollectionId::of::<User>().lock_name())
        .await
        .unwrap();

    let started = Instant::now();
    let err = manager.insert(&User::new(1)).await.unwrap_err();
    assert!(matches!(err, CacheError::LockTimeout { .. }), "{:?}", err);
    assert!(err.is_lock_error());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(manager.len::<User>().await.unwrap(), 0);

    assert!(guard.release().await.unwrap());
    manager.insert(&User::new(1)).await.unwrap();
    assert_eq!(manager.len::<User>().await.unwrap(), 1);
}

#[tokio::test]
async fn test_writer_waits_for_lock_release() {
    let backend = Arc::new(MemoryBackend::new());
    let (manager, _) = two_managers(&backend, shared_config(None));

    let external = LockManager::new(backend.clone(), shared_config(None).lock);
    let guard = external.acquire(&lock_name("test", "users")).await.unwrap();

    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        guard.release().await.unwrap()
    });

    let started = Instant::now();
    manager.insert(&User::new(7)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(releaser.await.unwrap());
}

#[tokio::test]
async fn test_other_collections_are_not_blocked() {
    let backend = Arc::new(MemoryBackend::new());
    let (manager, _) = two_managers(&backend, shared_config(Some(50)));

    let external = LockManager::new(backend.clone(), shared_config(None).lock);
    let _guard = external.acquire(&lock_name("test", "orders")).await.unwrap();

    manager.insert(&User::new(1)).await.unwrap();
}

#[tokio::test]
async fn test_lock_is_released_after_each_operation() {
    let backend = Arc::new(MemoryBackend::new());
    let (a, b) = two_managers(&backend, shared_config(Some(500)));
    let source = VecSource::new(user_docs(1..=3));
    let name = CollectionId::of::<User>().lock_name();

    a.cache::<User, _>(&source).await.unwrap();
    assert!(backend.lock_holder(&name).is_none());

    b.insert(&User::new(4)).await.unwrap();
    assert!(b.delete::<User, _>(|u| u.id == 1).await.unwrap());
    a.invalidate::<User>().await.unwrap();
    assert!(backend.lock_holder(&name).is_none());

    // 失败的重建同样释放锁
    source.set_failing(true);
    assert!(a.cache::<User, _>(&source).await.is_err());
    assert!(backend.lock_holder(&name).is_none());
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let backend = Arc::new(MemoryBackend::new());
    let crashed = LockManager::new(
        backend.clone(),
        LockConfig {
            ttl_ms: 50,
            retry_interval_ms: 10,
            wait_timeout_ms: None,
            auto_extend: false,
        },
    );
    // 持有者"崩溃"：锁不释放，只能等过期
    let guard = crashed.acquire(&lock_name("test", "users")).await.unwrap();
    std::mem::forget(guard);

    let (manager, _) = two_managers(&backend, shared_config(Some(1_000)));
    manager.insert(&User::new(1)).await.unwrap();
}
