//! 日志初始化：支持环境变量覆盖、默认值与可选的日志文件。

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing 日志订阅；指定日志文件时以追加方式写入该文件，否则输出到 stderr。
pub fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = log_file
        .map(|path| OpenOptions::new().create(true).append(true).open(path))
        .transpose()?;

    let (console_layer, file_layer) = match file {
        Some(file) => (
            None,
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
        ),
        None => (Some(fmt::layer().with_writer(io::stderr)), None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}
