//! collcache - 集合级缓存库
//!
//! 把整个集合快照到 Redis 列表中，支持按谓词读取、增量插入/删除，
//! 以及基于后台任务的定时刷新。同一集合的重建和修改通过分布式锁互斥。

#![doc(html_root_url = "https://docs.rs/collcache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod config;
pub mod error;
pub mod keyspace;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod serialization;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use backend::{ListStore, MemoryBackend, RedisBackend};
pub use config::Config;
pub use error::{CacheError, Result};
pub use keyspace::{list_key, lock_name, CollectionId};
pub use lock::{LockBackend, LockManager, ScopedLock};
pub use manager::CacheManager;
pub use model::{CollectionSource, Mongoclass};
pub use sync::{start_periodic, RefreshHandle, RefreshStatus};

/// collcache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
