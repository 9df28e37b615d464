use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/trace-ingest.log";

/// Our crates log at info, everything else (rusqlite, config) only at warn.
const DEFAULT_DIRECTIVES: &str = "warn,trace_ingest=info,trace_ingest_core=info";

/// Split `LOG_FILE_PATH` into the directory the daily appender writes to
/// and the file name prefix it rotates under.
fn split_log_path(raw: &str) -> (PathBuf, String) {
    let path = Path::new(raw);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trace-ingest.log".to_string());
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    (dir, file_name)
}

/// `TRACING_LEVEL` accepts a bare level or full filter directives. An
/// unparseable value falls back to the defaults and is reported once the
/// subscriber is up.
fn build_filter(requested: Option<&str>) -> (EnvFilter, Option<String>) {
    match requested {
        Some(raw) => match EnvFilter::try_new(raw) {
            Ok(filter) => (filter, None),
            Err(e) => (
                EnvFilter::new(DEFAULT_DIRECTIVES),
                Some(format!("ignoring TRACING_LEVEL={:?}: {}", raw, e)),
            ),
        },
        None => (EnvFilter::new(DEFAULT_DIRECTIVES), None),
    }
}

/// Console output plus a daily-rolled log file. The guard must outlive
/// every log call or buffered file lines are lost. If the log directory
/// cannot be created the run continues with console output only.
pub fn init_logger() -> Option<WorkerGuard> {
    let requested = env::var("TRACING_LEVEL").ok();
    let (filter, filter_problem) = build_filter(requested.as_deref());

    let raw_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (log_dir, file_name) = split_log_path(&raw_path);
    let dir_problem = fs::create_dir_all(&log_dir).err();

    let (file_layer, guard) = if dir_problem.is_none() {
        let appender = tracing_appender::rolling::daily(&log_dir, &file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .compact()
                .with_target(false)
                .without_time(),
        )
        .with(file_layer)
        .init();

    if let Some(problem) = filter_problem {
        warn!("{}", problem);
    }
    match dir_problem {
        Some(e) => warn!("Cannot create log directory {}: {}", log_dir.display(), e),
        None => info!("Logging to {}", log_dir.join(&file_name).display()),
    }

    guard
}
