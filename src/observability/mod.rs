//! 可观测性：tracing 日志输出到 stderr，stdout 只留给对话内容

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 warn，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
