//! 日志初始化。`RUST_LOG` 优先，其次为配置中的过滤规则。

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 安装全局订阅器；过滤规则无法解析时返回错误，不会静默退回默认值。
pub fn init_logging(fallback: &str) -> Result<(), ParseError> {
    let env_filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), fallback)?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
    Ok(())
}

fn build_filter(from_env: Option<String>, fallback: &str) -> Result<EnvFilter, ParseError> {
    match from_env.filter(|value| !value.trim().is_empty()) {
        Some(directives) => EnvFilter::try_new(directives),
        None => EnvFilter::try_new(fallback),
    }
}
