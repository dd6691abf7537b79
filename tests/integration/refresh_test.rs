//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 后台定时刷新集成测试

use collcache::config::Config;
use collcache::error::CacheError;
use collcache::manager::CacheManager;
use collcache::sync::refresher::{start_periodic, RefreshState};
use common::{setup_logging, user_docs, wait_until, User, VecSource};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

fn manager() -> Arc<CacheManager> {
    let mut config = Config::default();
    config.refresh.retry_backoff_ms = 10;
    Arc::new(CacheManager::in_memory(config).unwrap())
}

async fn cached_ids(manager: &CacheManager) -> Vec<u32> {
    manager
        .get_cached::<User>(10)
        .try_collect::<Vec<User>>()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect()
}

#[tokio::test]
async fn test_refresh_picks_up_source_changes() {
    setup_logging();
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));

    let handle =
        start_periodic::<User, _>(manager.clone(), source.clone(), Duration::from_millis(30))
            .unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || async {
            cached_ids(&manager).await == vec![1, 2]
        })
        .await
    );

    source.set_documents(user_docs([5, 6, 7]));
    assert!(
        wait_until(Duration::from_secs(2), || async {
            cached_ids(&manager).await == vec![5, 6, 7]
        })
        .await
    );

    let status = handle.stop().await;
    assert_eq!(status.state, RefreshState::Stopped);
    assert!(status.ticks >= 2);
    assert_eq!(status.failures, 0);
    assert!(status.last_success_at.is_some());
}

#[tokio::test]
async fn test_stop_ends_the_task() {
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));
    let handle =
        start_periodic::<User, _>(manager.clone(), source.clone(), Duration::from_millis(20))
            .unwrap();
    assert!(handle.is_running());
    assert_eq!(handle.collection().to_string(), "test.users");

    assert!(wait_until(Duration::from_secs(2), || async { source.scan_count() >= 2 }).await);
    handle.stop().await;

    let scans = source.scan_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.scan_count(), scans);
}

#[tokio::test]
async fn test_dropping_handle_cancels_refresh() {
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));
    let handle =
        start_periodic::<User, _>(manager.clone(), source.clone(), Duration::from_millis(20))
            .unwrap();
    assert!(wait_until(Duration::from_secs(2), || async { source.scan_count() >= 1 }).await);
    drop(handle);

    // 给正在进行的一次重建留出完成时间
    tokio::time::sleep(Duration::from_millis(50)).await;
    let scans = source.scan_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.scan_count(), scans);
}

#[tokio::test]
async fn test_detached_refresh_keeps_running() {
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));
    start_periodic::<User, _>(manager.clone(), source.clone(), Duration::from_millis(20))
        .unwrap()
        .detach();

    let scans = source.scan_count();
    assert!(
        wait_until(Duration::from_secs(2), || async {
            source.scan_count() >= scans + 3
        })
        .await
    );
}

#[tokio::test]
async fn test_failures_are_logged_and_the_loop_continues() {
    setup_logging();
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=3)));
    source.set_failing(true);

    let handle =
        start_periodic::<User, _>(manager.clone(), source.clone(), Duration::from_millis(30))
            .unwrap();
    assert!(wait_until(Duration::from_secs(2), || async { source.scan_count() >= 3 }).await);

    let status = handle.status().await;
    assert_eq!(status.state, RefreshState::Running);
    assert!(status.failures >= 2);
    assert!(status.consecutive_failures >= 2);
    assert!(status.last_error.as_deref().unwrap().contains("source is offline"));
    assert!(status.last_success_at.is_none());

    source.set_failing(false);
    assert!(
        wait_until(Duration::from_secs(2), || async {
            cached_ids(&manager).await == vec![1, 2, 3]
        })
        .await
    );

    let status = handle.stop().await;
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.last_record_count, Some(3));
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let manager = manager();
    let source = Arc::new(VecSource::new(Vec::new()));
    let err = start_periodic::<User, _>(manager, source, Duration::ZERO).unwrap_err();
    assert!(matches!(err, CacheError::Configuration(_)));
}

#[tokio::test]
async fn test_cache_every_zero_only_caches_once() {
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));

    let handle = manager
        .cache_every::<User, _>(source.clone(), Duration::ZERO)
        .await
        .unwrap();
    assert!(handle.is_none());
    assert_eq!(cached_ids(&manager).await, vec![1, 2]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.scan_count(), 1);
}

#[tokio::test]
async fn test_cache_every_schedules_after_first_interval() {
    let manager = manager();
    let source = Arc::new(VecSource::new(user_docs(1..=2)));

    let handle = manager
        .cache_every::<User, _>(source.clone(), Duration::from_millis(40))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source.scan_count(), 1);
    assert!(handle.is_running());

    source.set_documents(user_docs([9]));
    assert!(
        wait_until(Duration::from_secs(2), || async {
            cached_ids(&manager).await == vec![9]
        })
        .await
    );
    handle.stop().await;
}
