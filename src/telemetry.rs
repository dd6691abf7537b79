//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的日志和链路追踪初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化日志和 OpenTelemetry Tracing
///
/// 应在应用程序启动时调用一次。日志级别优先读取 `RUST_LOG`，否则使用 `default_filter`。
/// 未配置 exporter 时 tracer provider 不导出任何数据，span 仍会被创建。
///
/// # 参数
///
/// * `service_name` - 服务名称
/// * `default_filter` - 默认过滤规则，例如 "collcache=info"
///
/// # 返回值
///
/// 返回是否成功安装了全局 subscriber（已有其他 subscriber 时返回 false）
pub fn init_tracing(service_name: &str, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry);

    // 应用层可能已经安装了自己的 subscriber
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
