use anyhow::Result;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use ollama_bridge::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    // 日志写到 stderr，不干扰流式输出；用 RUST_LOG 调整级别
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().without_time().with_target(false).with_writer(std::io::stderr))
        .init();

    run_cli().await
}
