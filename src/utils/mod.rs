//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 工具模块：日志设置和敏感信息脱敏

pub mod redaction;

use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 安装一个简单的 fmt subscriber，重复调用无副作用
///
/// 日志级别优先读取 `RUST_LOG`，默认 debug
pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .try_init()
            .ok();
    });
}
