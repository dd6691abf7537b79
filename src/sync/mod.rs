//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的后台同步机制。

pub mod refresher;

pub use refresher::{start_periodic, start_periodic_after, RefreshHandle, RefreshState, RefreshStatus};
