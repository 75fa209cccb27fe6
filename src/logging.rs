use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init(file_dir: Option<PathBuf>) {
    let stdout_layer = tracing_subscriber::fmt::layer();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,altar_bridge=debug"));

    let maybe_file_layer = file_dir.map(|dir| {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "altar-bridge.log");

        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(maybe_file_layer)
        .init();
}

/// Initialize tracing: stdout always, a daily-rolling file in `file_dir`
/// if one is given. `RUST_LOG` overrides the default filter.
///
/// Only initializes once, so tests may call this freely.
pub fn init(file_dir: Option<PathBuf>) {
    static INITIALIZED: OnceLock<()> = OnceLock::new();

    INITIALIZED.get_or_init(|| {
        do_init(file_dir);
        info!("Logging initialized");
    });
}
