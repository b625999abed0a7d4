//! Tracing setup for binaries and tests embedding the tunnel.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where log output goes.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directive used when `RUST_LOG` is unset or unparsable
    pub default_filter: String,
    /// Also write a daily-rotated `<file_prefix>` file here
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            directory: None,
            file_prefix: "sshdb.log".to_string(),
        }
    }
}

/// Console logging, plus a rotating file when `log_dir` is set.
///
/// Keep the returned guard alive while the file layer is in use.
pub fn init_logging(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    init_with(LogOptions {
        directory: log_dir,
        ..LogOptions::default()
    })
}

/// Install a global subscriber. One installed earlier (by the host
/// application or another test) is left in place and `None` is returned.
pub fn init_with(options: LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let (file_layer, guard) = match &options.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .ok()
        .and(guard)
}
