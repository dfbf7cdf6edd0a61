//! Shared `tracing` setup for all three binaries: structured fields over
//! ad-hoc string interpolation, a daily-rotated file appender under
//! `<base>/logs/`, and a human-readable stdout copy for interactive use.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber for `binary_name` (`trainer`,
/// `thinker`, or `trader`). `verbosity` is the repeat count of the CLI's
/// `-v` flag (0 = info, 1 = debug, 2+ = trace); `RUST_LOG` always takes
/// precedence when set. The returned `WorkerGuard` must be kept alive for
/// the process lifetime or the non-blocking file writer drops queued lines
/// on exit.
pub fn init(base: &Path, binary_name: &str, verbosity: u8) -> WorkerGuard {
    let logs_dir = base.join("logs");
    let _ = std::fs::create_dir_all(&logs_dir);

    let file_appender = tracing_appender::rolling::daily(&logs_dir, format!("{binary_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(non_blocking))
        .with_target(true)
        .init();

    guard
}
